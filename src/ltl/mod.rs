// Linear temporal logic: formula parsing and automaton translation

pub mod automaton;
pub mod formula;

pub use automaton::*;
pub use formula::*;
