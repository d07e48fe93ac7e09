mod conductor_test;
