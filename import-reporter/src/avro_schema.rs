/// Avro schema of the messages on the report events topic. Each message is a
/// single binary encoded datum, with no container header.
pub const REPORT_EVENT_SCHEMA: &str = r#"
{
"type": "record",
"name": "ReportEvent",
"fields": [
    {"name": "instance_id", "type": "string", "default": ""},
    {"name": "event_type", "type": "string", "default": ""},
    {"name": "event_message", "type": "string", "default": ""},
    {"name": "service_name", "type": "string", "default": ""}
]
}
"#;
