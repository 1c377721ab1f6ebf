pub mod alphabet;
pub mod frame;
pub mod grouper;
pub mod names;
pub mod otu;
pub mod scanner;
pub mod session;
pub mod table;
pub mod translate;
