use thiserror::Error;

/// Errors that can occur in the CFR engine.
///
/// Numeric overflow is never surfaced here: integer tables handle it
/// locally by halving the affected row.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or inconsistent configuration, raised at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// A typed row view was requested with the wrong element type.
    #[error("storage policy mismatch: requested {requested} row, table holds {actual}")]
    PolicyMismatch {
        requested: &'static str,
        actual: &'static str,
    },

    /// The non-prephase pass expected a solved subgame that never arrived.
    #[error("no final values for player {player} nonterminal {nt} board {board}")]
    MissingFinalVals {
        player: usize,
        nt: usize,
        board: usize,
    },

    /// The subgame pool's slot state disagrees with its live counter.
    #[error("concurrency invariant violated: {0}")]
    ConcurrencyInvariant(String),

    /// I/O error reading a config file.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing error.
    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}
