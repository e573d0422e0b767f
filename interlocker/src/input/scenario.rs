use crate::input::interlocking_table::{Aspect, RouteId, SegmentId, SignalId, TrainId};
use crate::railway::drive::DriveMode;
use regex::Regex;

#[derive(Debug)]
pub struct Scenario {
    pub actions: Vec<ScenarioAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    Wait(f64),
    Grab(TrainId),
    Ungrab(TrainId),
    Place(TrainId, Vec<SegmentId>), // train now covers exactly these segments
    Occupy(SegmentId, bool),
    SetAspect(SignalId, Aspect),
    Grant(TrainId, RouteId),
    Request(TrainId, SignalId, SignalId), // train, source signal, destination signal
    Release(RouteId),
    Drive(TrainId, RouteId, DriveMode),
    Await(TrainId, Option<f64>), // train, timeout in seconds
}

#[derive(Debug, Fail)]
pub enum ParseError {
    #[fail(display = "error in regular expression: {}", _0)]
    RegexError(String),
    #[fail(display = "error converting number")]
    NumberError,
    #[fail(display = "unknown aspect: {}", _0)]
    UnknownAspect(String),
    #[fail(display = "unrecognized scenario line: {}", _0)]
    Unrecognized(String),
}

fn re(s: &str) -> Result<Regex, ParseError> {
    Regex::new(s).map_err(|e| ParseError::RegexError(format!("{:?}", e)))
}

/// Parses the scenario format, one action per line:
///
/// * wait 0.5
/// * grab t1
/// * place t1 seg1 seg2
/// * occupy seg4 / vacate seg4
/// * aspect signal3 go
/// * grant t1 r0
/// * request t1 signal1 signal2
/// * drive t1 r0 automatic
/// * await t1 5.0
/// * release r0
/// * ungrab t1
///
/// Empty lines and lines starting with `#` are ignored.
pub fn parse_scenario(input: &str) -> Result<Scenario, ParseError> {
    let mut actions = Vec::new();
    let wait_re = re(r"^\s*wait\s+([\d\.]+)\s*$")?;
    let grab_re = re(r"^\s*(grab|ungrab)\s+(\w+)\s*$")?;
    let place_re = re(r"^\s*place\s+(\w+)((?:\s+\w+)*)\s*$")?;
    let occupy_re = re(r"^\s*(occupy|vacate)\s+(\w+)\s*$")?;
    let aspect_re = re(r"^\s*aspect\s+(\w+)\s+(\w+)\s*$")?;
    let grant_re = re(r"^\s*grant\s+(\w+)\s+(\w+)\s*$")?;
    let request_re = re(r"^\s*request\s+(\w+)\s+(\w+)\s+(\w+)\s*$")?;
    let release_re = re(r"^\s*release\s+(\w+)\s*$")?;
    let drive_re = re(r"(?x) ^ \s* drive \s+ (?P<train>\w+) \s+ (?P<route>\w+)
                        (?: \s+ (?P<mode>automatic|manual) )? \s* $")?;
    let await_re = re(r"^\s*await\s+(\w+)(?:\s+([\d\.]+))?\s*$")?;

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(groups) = wait_re.captures(line) {
            let time = groups[1].parse::<f64>().map_err(|_e| ParseError::NumberError)?;
            actions.push(ScenarioAction::Wait(time));
            continue;
        }
        if let Some(groups) = grab_re.captures(line) {
            let train = groups[2].to_string();
            actions.push(if &groups[1] == "grab" {
                ScenarioAction::Grab(train)
            } else {
                ScenarioAction::Ungrab(train)
            });
            continue;
        }
        if let Some(groups) = place_re.captures(line) {
            let segments = groups[2].split_whitespace().map(|s| s.to_string()).collect();
            actions.push(ScenarioAction::Place(groups[1].to_string(), segments));
            continue;
        }
        if let Some(groups) = occupy_re.captures(line) {
            actions.push(ScenarioAction::Occupy(groups[2].to_string(), &groups[1] == "occupy"));
            continue;
        }
        if let Some(groups) = aspect_re.captures(line) {
            let aspect = Aspect::from_name(&groups[2])
                .ok_or_else(|| ParseError::UnknownAspect(groups[2].to_string()))?;
            actions.push(ScenarioAction::SetAspect(groups[1].to_string(), aspect));
            continue;
        }
        if let Some(groups) = grant_re.captures(line) {
            actions.push(ScenarioAction::Grant(groups[1].to_string(), groups[2].to_string()));
            continue;
        }
        if let Some(groups) = request_re.captures(line) {
            actions.push(ScenarioAction::Request(groups[1].to_string(),
                                                 groups[2].to_string(),
                                                 groups[3].to_string()));
            continue;
        }
        if let Some(groups) = release_re.captures(line) {
            actions.push(ScenarioAction::Release(groups[1].to_string()));
            continue;
        }
        if let Some(groups) = drive_re.captures(line) {
            let mode = match groups.name("mode").map(|m| m.as_str()) {
                Some("automatic") => DriveMode::Automatic,
                _ => DriveMode::Manual,
            };
            actions.push(ScenarioAction::Drive(groups["train"].to_string(),
                                               groups["route"].to_string(),
                                               mode));
            continue;
        }
        if let Some(groups) = await_re.captures(line) {
            let timeout = match groups.get(2) {
                Some(t) => Some(t.as_str().parse::<f64>().map_err(|_e| ParseError::NumberError)?),
                None => None,
            };
            actions.push(ScenarioAction::Await(groups[1].to_string(), timeout));
            continue;
        }
        return Err(ParseError::Unrecognized(line.to_string()));
    }

    Ok(Scenario { actions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_actions() {
        let s = parse_scenario("
            # set up
            grab t1
            place t1 segA segB
            place t2
            vacate segC
            aspect signalC go
            grant t1 R0
            request t1 signalA signalB
            drive t1 R0 automatic
            drive t1 R0
            wait 0.25
            await t1
            await t1 2.5
            release R0
            ungrab t1
        ").unwrap();

        use super::ScenarioAction::*;
        assert_eq!(s.actions, vec![
            Grab("t1".to_string()),
            Place("t1".to_string(), vec!["segA".to_string(), "segB".to_string()]),
            Place("t2".to_string(), vec![]),
            Occupy("segC".to_string(), false),
            SetAspect("signalC".to_string(), crate::input::interlocking_table::Aspect::Go),
            Grant("t1".to_string(), "R0".to_string()),
            Request("t1".to_string(), "signalA".to_string(), "signalB".to_string()),
            Drive("t1".to_string(), "R0".to_string(), DriveMode::Automatic),
            Drive("t1".to_string(), "R0".to_string(), DriveMode::Manual),
            Wait(0.25),
            Await("t1".to_string(), None),
            Await("t1".to_string(), Some(2.5)),
            Release("R0".to_string()),
            Ungrab("t1".to_string()),
        ]);
    }

    #[test]
    fn rejects_unknown_lines() {
        match parse_scenario("teleport t1 segA") {
            Err(ParseError::Unrecognized(l)) => assert_eq!(l, "teleport t1 segA"),
            x => panic!("unexpected {:?}", x),
        }
        match parse_scenario("aspect signalA purple") {
            Err(ParseError::UnknownAspect(a)) => assert_eq!(a, "purple"),
            x => panic!("unexpected {:?}", x),
        }
    }
}
