use failure::Error;
use super::history::{History, InterlockingLogEvent, RouteStatus};
use crate::railway::drive::DriveState;
use crate::railway::registry::RouteRegistry;
use std::io;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn string_list(xs: &[String]) -> String {
    let items = xs.iter().map(|x| format!("\"{}\"", escape(x))).collect::<Vec<String>>();
    format!("[{}]", items.join(", "))
}

fn drive_state(s: DriveState) -> &'static str {
    match s {
        DriveState::Initializing => "initializing",
        DriveState::Progressing => "progressing",
        DriveState::Completed => "completed",
        DriveState::Aborted => "aborted",
    }
}

/// Writes the route table summary and the event history as one JSON object.
pub fn json_history<W: io::Write>(registry: &RouteRegistry, history: &History, f: &mut W) -> Result<(), Error> {
    write!(f, "{{ \"routes\": {{")?;
    let mut first = true;
    for id in registry.all_ids() {
        let route = match registry.lookup_by_id(id) {
            Some(r) => r,
            None => continue,
        };
        if first { first = false; } else { write!(f, ", ")?; }
        write!(f,
               "\"{}\": {{ \"source\": \"{}\", \"destination\": \"{}\", \"length\": {}, \"signals\": {} }}",
               escape(id),
               escape(&route.source),
               escape(&route.destination),
               route.length,
               string_list(&route.signals))?;
    }
    write!(f, "}},\n")?;

    write!(f, "\"events\": [")?;
    let mut first = true;
    for ev in &history.events {
        if first { first = false; } else { write!(f, ",\n  ")?; }
        use InterlockingLogEvent::*;
        match *ev {
            Route(ref r, ref status) => {
                let (value, train) = match *status {
                    RouteStatus::Granted(ref t) => ("granted", Some(t)),
                    RouteStatus::NotGrantable => ("not_grantable", None),
                    RouteStatus::NotClear => ("not_clear", None),
                    RouteStatus::Released => ("released", None),
                };
                write!(f, "{{ \"event\": \"route\", \"ref\": \"{}\", \"value\": \"{}\"", escape(r), value)?;
                if let Some(t) = train {
                    write!(f, ", \"train\": \"{}\"", escape(t))?;
                }
                write!(f, " }}")?;
            }
            Aspect(ref s, aspect) => {
                write!(f, "{{ \"event\": \"signal\", \"ref\": \"{}\", \"value\": \"{}\" }}", escape(s), aspect.name())?;
            }
            Point(ref p, position) => {
                write!(f, "{{ \"event\": \"point\", \"ref\": \"{}\", \"value\": \"{}\" }}", escape(p), position.name())?;
            }
            Occupied(ref s, x) => {
                write!(f, "{{ \"event\": \"occupied\", \"ref\": \"{}\", \"value\": {} }}", escape(s), x)?;
            }
            Position(ref t, ref segments) => {
                write!(f, "{{ \"event\": \"position\", \"ref\": \"{}\", \"value\": {} }}", escape(t), string_list(segments))?;
            }
            Grab(ref t, x) => {
                write!(f, "{{ \"event\": \"grab\", \"ref\": \"{}\", \"value\": {} }}", escape(t), x)?;
            }
            Drive(ref t, ref r, state) => {
                write!(f,
                       "{{ \"event\": \"drive\", \"ref\": \"{}\", \"route\": \"{}\", \"value\": \"{}\" }}",
                       escape(t),
                       escape(r),
                       drive_state(state))?;
            }
        }
    }
    write!(f, "] }}\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_table_string;
    use crate::input::interlocking_table::Aspect;

    #[test]
    fn writes_events() {
        let reg = RouteRegistry::new(get_table_string("
            segments [s1, s2] signals [a, b]
            route r { source a destination b orientation clockwise length 10 path [s1, s2] signals [a, b] }
        ").unwrap()).unwrap();
        let history = History {
            events: vec![InterlockingLogEvent::Route("r".to_string(), RouteStatus::Granted("T\"1".to_string())),
                         InterlockingLogEvent::Aspect("a".to_string(), Aspect::Go),
                         InterlockingLogEvent::Drive("T1".to_string(), "r".to_string(), DriveState::Completed)],
        };
        let mut out = Vec::new();
        json_history(&reg, &history, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("{ \"routes\": {\"r\": { \"source\": \"a\""));
        assert!(s.contains("\"value\": \"granted\", \"train\": \"T\\\"1\""));
        assert!(s.contains("{ \"event\": \"signal\", \"ref\": \"a\", \"value\": \"go\" }"));
        assert!(s.contains("\"value\": \"completed\""));
    }
}
