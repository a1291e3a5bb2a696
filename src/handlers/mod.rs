// src/handlers/mod.rs

pub mod attempt;
pub mod enrollment;
pub mod maintenance;
pub mod quiz;
