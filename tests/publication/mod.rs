mod completion_test;
mod record_test;
