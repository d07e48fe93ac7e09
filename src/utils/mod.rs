pub(crate) mod async_task;
pub(crate) mod codec;
pub(crate) mod time;
