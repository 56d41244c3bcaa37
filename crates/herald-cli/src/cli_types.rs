use clap::ValueEnum;

/// User directory backend selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliUserStore {
    /// Flat `users.json` file.
    Json,
    /// SQLite database file.
    Sqlite,
    /// Process memory only; registrations are lost on restart.
    Memory,
}
