//! Configuration section definitions.
//!
//! Each module corresponds to a section in `lumo.toml`:
//!
//! | Module     | TOML Section   | Purpose                           |
//! |------------|----------------|-----------------------------------|
//! | `app`      | `[app]`        | Application metadata              |
//! | `paths`    | `[paths]`      | Project layout paths              |
//! | `serve`    | `[serve]`      | Development server                |
//! | `compiler` | `[compiler]`   | Component compiler settings       |

mod app;
mod compiler;
mod paths;
mod serve;

// Re-export section configs
pub use app::AppSection;
pub use compiler::CompilerConfig;
pub use paths::PathsConfig;
pub use serve::ServeConfig;
