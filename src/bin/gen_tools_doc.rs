use ouster_mcp::{ToolCategory, ToolInfo, TOOL_REGISTRY};
use std::collections::HashMap;
use std::fmt::Write as _;

fn main() {
    let mut groups: HashMap<ToolCategory, Vec<&ToolInfo>> = HashMap::new();
    for tool in TOOL_REGISTRY {
        groups.entry(tool.category).or_default().push(tool);
    }

    let tool_count = TOOL_REGISTRY.len();

    let mut out = String::new();
    let _ = writeln!(out, "# Tools\n");
    let _ = writeln!(
        out,
        "> Auto-generated from `src/tool_registry.rs`. Do not edit by hand."
    );
    let _ = writeln!(
        out,
        "> Regenerate with: `cargo run --bin gen_tools_doc -- docs/TOOLS.md`.\n"
    );

    let _ = writeln!(out, "## Discovery Workflow\n");
    let _ = writeln!(
        out,
        "- `tools/list` returns the full tool set (currently {tool_count} tools)"
    );
    let _ = writeln!(
        out,
        "- `tool_catalog(query=...)` searches all tools by intent"
    );
    let _ = writeln!(
        out,
        "- `tool_help(name=...)` returns full documentation and schema"
    );
    let _ = writeln!(
        out,
        "- Call `disconnect_sensor` and `stop_visualization` when done; anything left open is released on exit"
    );
    let _ = writeln!(out);

    for &cat in ToolCategory::all() {
        let Some(tools) = groups.get(&cat) else {
            continue;
        };
        let _ = writeln!(out, "## {} (`{}`)\n", cat.title(), cat.as_str());
        let _ = writeln!(out, "{}", cat.description());
        let _ = writeln!(out, "\n| Tool | Description | Example |");
        let _ = writeln!(out, "|------|-------------|---------|");
        for tool in tools {
            let _ = writeln!(
                out,
                "| `{}` | {} | `{}` |",
                tool.name, tool.short_desc, tool.example
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Notes\n");
    let _ = writeln!(
        out,
        "- Every sensor tool takes `hostname` (alias `address`): a hostname or IP address"
    );
    let _ = writeln!(
        out,
        "- Results are JSON with a `status` field; `status: error` results are flagged `is_error`"
    );
    let _ = writeln!(
        out,
        "- Discovery and visualization run `ouster-cli` (override with `--ouster-cli` or `OUSTER_CLI`)"
    );

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        if let Err(err) = std::fs::write(&args[1], out) {
            eprintln!("failed to write {}: {}", args[1], err);
            std::process::exit(1);
        }
    } else {
        print!("{out}");
    }
}
