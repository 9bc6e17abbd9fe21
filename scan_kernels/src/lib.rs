#![cfg_attr(
    target_os = "cuda",
    no_std,
    feature(register_attr),
    register_attr(nvvm_internal)
)]

pub mod conv;
pub mod scan;
mod step;
mod summand;

pub use summand::Summand;
