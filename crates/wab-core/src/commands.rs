//! Chat commands recognised in inbound text.

pub const NO_LINKS_NOTICE: &str = "No links collected yet.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `!links`: list collected links.
    Links,
    /// `!clear_links`: forget every collected link.
    ClearLinks,
}

/// Which commands are answered. Disabled commands are handled as ordinary text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSet {
    pub links: bool,
    pub clear_links: bool,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            links: true,
            clear_links: true,
        }
    }
}

impl Command {
    pub fn token(self) -> &'static str {
        match self {
            Command::Links => "!links",
            Command::ClearLinks => "!clear_links",
        }
    }

    /// Case-insensitive exact match on the whole body.
    pub fn parse(text: &str, enabled: CommandSet) -> Option<Self> {
        let lower = text.to_lowercase();
        if enabled.links && lower == Command::Links.token() {
            return Some(Command::Links);
        }
        if enabled.clear_links && lower == Command::ClearLinks.token() {
            return Some(Command::ClearLinks);
        }
        None
    }
}

pub fn format_links(links: &[String]) -> String {
    if links.is_empty() {
        return NO_LINKS_NOTICE.to_string();
    }
    let mut out = String::from("Collected links:");
    for (idx, link) in links.iter().enumerate() {
        out.push_str(&format!("\n{}. {link}", idx + 1));
    }
    out
}

pub fn format_cleared(count: usize) -> String {
    format!("Cleared {count} collected link(s).")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively_but_exactly() {
        let all = CommandSet::default();
        assert_eq!(Command::parse("!LINKS", all), Some(Command::Links));
        assert_eq!(Command::parse("!Clear_Links", all), Some(Command::ClearLinks));
        assert_eq!(Command::parse("!links please", all), None);
        assert_eq!(Command::parse(" !links", all), None);
        assert_eq!(Command::parse("links", all), None);
    }

    #[test]
    fn disabled_commands_are_plain_text() {
        let only_links = CommandSet {
            links: true,
            clear_links: false,
        };
        assert_eq!(Command::parse("!clear_links", only_links), None);
        assert_eq!(Command::parse("!links", only_links), Some(Command::Links));
    }

    #[test]
    fn formats_numbered_list_or_notice() {
        assert_eq!(format_links(&[]), NO_LINKS_NOTICE);
        assert_eq!(
            format_links(&["https://chat.whatsapp.com/A".into(), "https://chat.whatsapp.com/B".into()]),
            "Collected links:\n1. https://chat.whatsapp.com/A\n2. https://chat.whatsapp.com/B"
        );
        assert_eq!(format_cleared(2), "Cleared 2 collected link(s).");
    }
}
