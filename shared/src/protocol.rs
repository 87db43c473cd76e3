/// Separator between the IPv4 and IPv6 halves of a persisted address record
pub const RECORD_SEPARATOR: char = ',';

/// Extension of the staged download that replaces the live bootstrap file
pub const STAGING_EXTENSION: &str = "tmp";

/// Extension of the single-generation backup of the bootstrap file
pub const BACKUP_EXTENSION: &str = "bak";

/// systemd unit name used by `install`/`uninstall`
pub const DAEMON_UNIT_NAME: &str = "planet-syncd";
