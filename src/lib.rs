pub mod gateway;
pub mod history;
pub mod io_struct;
pub mod normalizer;
pub mod server;
