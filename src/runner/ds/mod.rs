pub mod class;
pub mod error;
pub mod function;
pub mod key;
pub mod scope;
pub mod value;
