mod allocation_test;
mod lifecycle_test;
