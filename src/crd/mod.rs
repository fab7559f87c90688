mod rhmi;

pub use rhmi::*;
