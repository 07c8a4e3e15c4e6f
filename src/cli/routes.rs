//! `lumo routes` - print the resolved route table.

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config::AppConfig;
use crate::router::Router;

/// Print every registered route in declaration order.
///
/// Declaration order is also match priority for overlapping dynamic
/// patterns, so the listing doubles as the resolution order.
pub fn print_routes(config: &AppConfig) -> Result<()> {
    let router = Router::load(&config.paths.routes)?;

    let width = router
        .entries()
        .map(|(pattern, _)| pattern.len())
        .max()
        .unwrap_or(0);

    for (pattern, entry) in router.entries() {
        let pattern = format!("{pattern:<width$}");
        let target = format!("{}.{}", entry.owner, entry.action);
        println!(
            "{}  {:<24}  {}",
            pattern.cyan(),
            target,
            entry.template.dimmed()
        );
    }
    println!();
    println!(
        "{} route{}",
        router.len(),
        if router.len() == 1 { "" } else { "s" }
    );
    Ok(())
}
