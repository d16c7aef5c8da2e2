mod token;

pub use token::{extract_token, TokenValidator};
