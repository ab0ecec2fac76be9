use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "server": {
                "type": "object",
                "properties": {
                    "host": { "type": "string" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                    "api_token": { "type": "string" }
                },
                "additionalProperties": false
            },
            "database": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "additionalProperties": false
            },
            "queue": {
                "type": "object",
                "properties": {
                    "lease_ttl": { "$ref": "#/$defs/duration" },
                    "max_requeues": { "type": "integer", "minimum": 0 },
                    "dead_letter_alert": { "type": "integer", "minimum": 0 }
                },
                "additionalProperties": false
            },
            "dispatch": {
                "type": "object",
                "properties": {
                    "max_batch": { "type": "integer", "minimum": 1 },
                    "accept_late_results": { "type": "boolean" }
                },
                "additionalProperties": false
            },
            "supervisor": {
                "type": "object",
                "properties": {
                    "tick": { "$ref": "#/$defs/duration" },
                    "grace_period": { "$ref": "#/$defs/duration" },
                    "health_interval": { "$ref": "#/$defs/duration" },
                    "probe_timeout": { "$ref": "#/$defs/duration" },
                    "restart": { "$ref": "#/$defs/restart" }
                },
                "additionalProperties": false
            },
            "agents": {
                "type": "array",
                "items": { "$ref": "#/$defs/agent" }
            },
            "maintenance": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "every", "action"],
                    "properties": {
                        "name": { "type": "string" },
                        "every": { "$ref": "#/$defs/duration" },
                        "action": {
                            "type": "object",
                            "required": ["kind"],
                            "properties": {
                                "kind": { "type": "string", "enum": ["command", "reload-agents"] },
                                "command": { "type": "array", "items": { "type": "string" } },
                                "working_dir": { "type": "string" },
                                "timeout": { "$ref": "#/$defs/duration" }
                            }
                        }
                    }
                }
            }
        },
        "additionalProperties": false,
        "$defs": {
            "duration": {
                "oneOf": [
                    { "type": "string" },
                    { "type": "integer", "minimum": 0 }
                ]
            },
            "restart": {
                "type": "object",
                "properties": {
                    "max_retries": { "type": "integer", "minimum": 0 },
                    "backoff_base": { "$ref": "#/$defs/duration" },
                    "backoff_cap": { "$ref": "#/$defs/duration" },
                    "failure_threshold": { "type": "integer", "minimum": 1 }
                },
                "additionalProperties": false
            },
            "agent": {
                "type": "object",
                "required": ["id", "command"],
                "properties": {
                    "id": { "type": "string", "pattern": "^[A-Za-z0-9_.-]+$" },
                    "command": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                    "working_dir": { "type": "string" },
                    "instances": { "type": "integer", "minimum": 0 },
                    "health_interval": { "$ref": "#/$defs/duration" },
                    "probe": {
                        "type": "object",
                        "required": ["kind"],
                        "properties": {
                            "kind": { "type": "string", "enum": ["process", "http"] },
                            "url": { "type": "string", "format": "uri" },
                            "timeout": { "$ref": "#/$defs/duration" }
                        }
                    },
                    "restart": { "$ref": "#/$defs/restart" },
                    "env": {
                        "type": "object",
                        "additionalProperties": { "type": "string" }
                    }
                }
            }
        }
    })
});
