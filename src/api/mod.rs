pub(crate) mod common;

pub mod chat;
pub mod embeddings;
pub mod generate;
pub mod health;
pub mod llamaedge;
pub mod tags;
