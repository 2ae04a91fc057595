//! List command implementation

use crate::targets;

/// List all supported debug targets
pub fn list_targets() {
    let targets = targets::available_targets();
    if targets.is_empty() {
        println!("No targets available (recompile with target features enabled)");
        return;
    }

    println!("Supported targets:");
    println!();
    for t in &targets {
        println!("  {:10} - {}", t.name, t.description);
        if !t.aliases.is_empty() {
            println!("  {:10}   aliases: {}", "", t.aliases.join(", "));
        }
    }
}
