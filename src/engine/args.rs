use crate::types::ScanRequest;

pub const PORT_FLAG: &str = "-p";
pub const TIMEOUT_FLAG: &str = "-t";
pub const FORMAT_FLAG: &str = "-o";
pub const DETECTION_FLAG: &str = "-A";

/// Argument vector handed to the engine.
///
/// Order is part of the engine contract: targets, port flag, timeout flag,
/// format flag, then the optional detection flag.
pub fn build_args(request: &ScanRequest) -> Vec<String> {
    let mut args = Vec::with_capacity(request.targets.len() + 7);
    args.extend(request.targets.iter().cloned());
    args.push(PORT_FLAG.to_string());
    args.push(request.ports.clone());
    args.push(TIMEOUT_FLAG.to_string());
    args.push(request.timeout_secs.to_string());
    args.push(FORMAT_FLAG.to_string());
    args.push(request.format.as_str().to_string());
    if request.detection {
        args.push(DETECTION_FLAG.to_string());
    }
    args
}
