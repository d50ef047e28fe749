//! Operator command language shared by every front-end.

pub mod catalog;
pub mod commands;
pub mod grammar;
