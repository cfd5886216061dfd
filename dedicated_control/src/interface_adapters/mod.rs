// Interface adapters: host wire protocol and collaborator implementations.

pub mod protocol;
pub mod utils;
