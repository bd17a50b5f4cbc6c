/// mDNS service type the daemon advertises itself under
pub const PHOTOBACKUP_SERVICE_TYPE: &str = "_photobackup._tcp.local.";

/// Default DNS-SD instance name
pub const DEFAULT_SERVICE_NAME: &str = "iPhone Photo Backup";

/// Port tried first when the daemon starts
pub const DEFAULT_PORT: u16 = 3000;

/// Multipart field carrying the photo bytes
pub const UPLOAD_FIELD: &str = "photo";

/// Optional request header overriding the multipart filename
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Largest accepted upload, inclusive
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Directory under the user's home that holds all backups
pub const BACKUP_DIR_NAME: &str = "iPhone_Photo_Backup";

/// HTTP paths
pub const STATUS_PATH: &str = "/status";
pub const UPLOAD_PATH: &str = "/upload";
