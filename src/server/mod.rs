mod app;
mod serve;
mod state;

pub use app::create_app;
pub use serve::{run, serve_listener};
pub use state::AppState;
