//! Input topic parsing

/// Extract the input channel name from a topic under `inputs_prefix`.
///
/// The channel is the first level after the prefix; anything after it is the
/// URL-encoded property bag the hub appends. Returns `None` for topics outside
/// the prefix or with an empty channel.
pub fn parse_input_channel<'a>(inputs_prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(inputs_prefix)?;
    let channel = rest.split('/').next().unwrap_or_default();
    if channel.is_empty() {
        None
    } else {
        Some(channel)
    }
}
