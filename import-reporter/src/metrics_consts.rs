pub const MESSAGES_RECEIVED: &str = "import_reporter_messages_received";
pub const MESSAGES_COMMITTED: &str = "import_reporter_messages_committed";
pub const MESSAGE_COMMIT_FAILED: &str = "import_reporter_message_commit_failed";
pub const MESSAGE_PROCESSING_FAILED: &str = "import_reporter_message_processing_failed";
pub const MESSAGE_PROCESSING_TIME: &str = "import_reporter_message_processing_seconds";
pub const DECODE_FAILED: &str = "import_reporter_decode_failed";
pub const TRANSPORT_RECV_ERRORS: &str = "import_reporter_transport_recv_errors";

pub const CACHE_HITS: &str = "import_reporter_cache_hits";
pub const CACHE_MISSES: &str = "import_reporter_cache_misses";
pub const EVENTS_ALREADY_RECORDED: &str = "import_reporter_events_already_recorded";
pub const INSTANCE_EVENTS_ADDED: &str = "import_reporter_instance_events_added";
pub const INSTANCES_FAILED: &str = "import_reporter_instances_failed";

pub const CACHE_DROPPED: &str = "import_reporter_cache_dropped";
