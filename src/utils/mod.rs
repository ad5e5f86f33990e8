// src/utils/mod.rs
pub mod lenient;
