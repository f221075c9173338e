pub mod recognizer;
pub mod stream;
