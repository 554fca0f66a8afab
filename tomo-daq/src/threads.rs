pub mod worker;

pub(crate) use worker::acquisition_worker;
