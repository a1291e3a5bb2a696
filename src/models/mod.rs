// src/models/mod.rs

pub mod attempt;
pub mod enrollment;
pub mod question;
pub mod quiz;
