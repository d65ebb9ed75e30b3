//! Result output
//!
//! Console rendering of round results. Persistence lives in [`crate::store`].

pub mod text;
