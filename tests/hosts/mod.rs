mod command_queue_test;
mod assignment_test;
