// socialnet-common: wire types shared by the relay and its publishers

pub mod protocol;
pub mod types;
