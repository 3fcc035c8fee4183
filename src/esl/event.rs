// src/esl/event.rs
use std::collections::HashMap;

/// A decoded `text/event-plain` event
#[derive(Debug, Clone, Default)]
pub struct EslEvent {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl EslEvent {
    /// Parse the body of a `text/event-plain` frame. Header values are
    /// URL-encoded on the wire.
    pub fn parse_plain(data: &str) -> Option<Self> {
        let mut headers = HashMap::new();
        let mut lines = data.split('\n');

        for line in lines.by_ref() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            if let Some(pos) = line.find(':') {
                let key = line[..pos].trim().to_string();
                let raw = line[pos + 1..].trim();
                let value = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                headers.insert(key, value);
            }
        }

        if headers.is_empty() {
            return None;
        }

        let rest: Vec<&str> = lines.collect();
        let body = rest.join("\n");
        let body = if body.trim().is_empty() { None } else { Some(body) };

        Some(EslEvent { headers, body })
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get_header("Event-Name")
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.event_name() == Some(name)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.get_header("Unique-ID")
            .or_else(|| self.get_header("Channel-Call-UUID"))
    }

    /// Peer leg of a bridged channel
    pub fn other_leg(&self) -> Option<&str> {
        self.get_header("Other-Leg-Unique-ID")
            .or_else(|| self.get_header("variable_originating_leg_uuid"))
    }

    pub fn caller(&self) -> Option<&str> {
        self.get_header("Caller-Caller-ID-Number")
            .or_else(|| self.get_header("variable_sip_from_user"))
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.get_header("Caller-Caller-ID-Name")
            .filter(|name| !name.is_empty() && *name != "unknown")
    }

    pub fn callee(&self) -> Option<&str> {
        self.get_header("Caller-Destination-Number")
            .or_else(|| self.get_header("variable_dialed_user"))
    }

    pub fn hangup_cause(&self) -> Option<&str> {
        self.get_header("Hangup-Cause")
    }

    pub fn job_uuid(&self) -> Option<&str> {
        self.get_header("Job-UUID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_decodes_values() {
        let data = "Event-Name: CHANNEL_CREATE\n\
                    Unique-ID: 6f1c\n\
                    Caller-Caller-ID-Name: Jane%20Doe\n\
                    Caller-Caller-ID-Number: %2B254700000001\n\
                    Caller-Destination-Number: 1001\n\n";
        let event = EslEvent::parse_plain(data).unwrap();

        assert!(event.is_event("CHANNEL_CREATE"));
        assert_eq!(event.unique_id(), Some("6f1c"));
        assert_eq!(event.caller_name(), Some("Jane Doe"));
        assert_eq!(event.caller(), Some("+254700000001"));
        assert_eq!(event.callee(), Some("1001"));
        assert!(event.body.is_none());
    }

    #[test]
    fn test_parse_plain_keeps_body() {
        let data = "Event-Name: BACKGROUND_JOB\nJob-UUID: j1\nContent-Length: 22\n\n-ERR NO_ROUTE_DESTINATION\n";
        let event = EslEvent::parse_plain(data).unwrap();
        assert_eq!(event.job_uuid(), Some("j1"));
        assert_eq!(event.body.as_deref().map(str::trim), Some("-ERR NO_ROUTE_DESTINATION"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(EslEvent::parse_plain("\n").is_none());
    }
}
