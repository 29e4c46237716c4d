// src/command_center/mod.rs
//! Centro de Comando: the natural-language command pipeline. An external
//! agent proposes queries and mutations; mutations are never executed
//! directly — they are staged, previewed and double-confirmed before
//! touching the database.

pub mod feedback;
pub mod gate;
pub mod orchestrator;
pub mod renderer;
pub mod session_store;
pub mod stager;
pub mod types;

#[cfg(test)]
pub mod test_support;
