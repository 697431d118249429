//! Tool handler modules, one per category

pub mod arch;
pub mod code;
pub mod coordination;
pub mod docs;
pub mod graph;
pub mod memory;
pub mod meta;
pub mod pack;
pub mod progress;
pub mod setup;
pub mod testing;

use crate::registry::ToolSpec;

/// The complete tool surface, assembled category by category.
pub fn specs() -> Vec<ToolSpec> {
    let mut specs = Vec::new();
    specs.extend(graph::specs());
    specs.extend(code::specs());
    specs.extend(arch::specs());
    specs.extend(testing::specs());
    specs.extend(progress::specs());
    specs.extend(memory::specs());
    specs.extend(coordination::specs());
    specs.extend(pack::specs());
    specs.extend(docs::specs());
    specs.extend(setup::specs());
    specs.extend(meta::specs());
    specs
}
