pub mod cache;
pub mod renderer;
pub mod rules;

pub use cache::{InfoCache, InfoKind};
pub use renderer::{PokeInput, Renderer};
pub use rules::format_time_str;
