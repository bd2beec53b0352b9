/// This module contains logic for detecting transaction conflicts.
pub mod detection;
