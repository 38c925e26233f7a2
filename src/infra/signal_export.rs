// ============================================================
// Layer 6 — Signal Export
// ============================================================
// Writes an input / target / output signal triple to CSV for
// visual inspection in any plotting tool:
//
//   t,feature,input,target,output
//   0,0,0.131004,0.000000,0.000000
//   1,0,-0.204551,0.131004,0.118230
//   ...

use anyhow::{ensure, Context, Result};
use std::{fs, io::Write, path::Path};

use crate::domain::signal::SignalSequence;

/// Write `sequence` and the model `output` (row-major [seq_len, features]).
pub fn plot_signals(sequence: &SignalSequence, output: &[f32], path: &Path) -> Result<()> {
    ensure!(
        output.len() == sequence.input.len(),
        "output has {} values, expected {}",
        output.len(),
        sequence.input.len()
    );

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }

    let mut f = fs::File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    writeln!(f, "t,feature,input,target,output")?;

    for t in 0..sequence.seq_len {
        for c in 0..sequence.features {
            writeln!(
                f,
                "{},{},{:.6},{:.6},{:.6}",
                t,
                c,
                sequence.input_at(t, c),
                sequence.target_at(t, c),
                output[t * sequence.features + c],
            )?;
        }
    }

    tracing::info!(
        "Wrote {} steps x {} features to '{}'",
        sequence.seq_len,
        sequence.features,
        path.display()
    );
    Ok(())
}
