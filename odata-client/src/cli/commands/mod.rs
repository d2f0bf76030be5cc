pub mod batch;
pub mod decode;
pub mod poll;
pub mod url;
