use std::collections::BTreeMap;
use tokio::process::Command;

use crate::util::Error;

/// Shell-out fallback for topology submission: Storm's JAR is opaque to a
/// REST/RPC client unless it was built with Storm's own serialization tools,
/// so the pragmatic path invokes the `storm jar` CLI the same way an
/// operator would from a terminal.
pub async fn shell_submit(
    storm_binary: &str,
    jar_path: &str,
    main_class: &str,
    topology_name: &str,
    args: &[String],
    config: &BTreeMap<String, String>,
    nimbus_seeds: &[String],
) -> Result<(), Error> {
    let mut cmd = Command::new(storm_binary);
    cmd.arg("jar").arg(jar_path).arg(main_class);
    cmd.arg(topology_name);
    cmd.args(args);
    for (k, v) in config {
        cmd.arg("-c").arg(format!("{k}={v}"));
    }
    cmd.arg("-c").arg(format!(
        "nimbus.seeds=[{}]",
        nimbus_seeds
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let output = cmd
        .output()
        .await
        .map_err(|e| Error::Jar(format!("failed to invoke '{storm_binary}': {e}")))?;

    if !output.status.success() {
        return Err(Error::Jar(format!(
            "'{storm_binary} jar' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
