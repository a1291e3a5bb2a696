// src/services/mod.rs

pub mod attempt;
pub mod enrollment;
pub mod quiz;
pub mod scheduling;
pub mod sweeper;
