//! Incremental validator for atc commands
//!
//! Commands are validated one keystroke at a time against a fixed graph of
//! fragments. Each fragment maps one input character to a piece of rendered
//! text, a submittable flag, and the groups of fragments allowed to follow
//! it. Follower groups are shared between parents (the same digit group
//! serves altitudes, landmarks, and delays), so the graph is a DAG built
//! once from declarative tables, not a tree of nested literals.

use shared::{CHAT_ESCAPE, MAX_RENDERED};
use std::sync::OnceLock;

/// Result of validating a typed string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Human-readable expansion of what was typed.
    pub rendering: String,
    /// Whether ENTER may transmit the string as it stands.
    pub submittable: bool,
}

type FragId = usize;
type GroupId = usize;

struct Fragment {
    input: char,
    output: String,
    submittable: bool,
    followers: Vec<GroupId>,
}

/// The fragment graph. Build once with `Grammar::new()` or use the shared
/// instance from `Grammar::shared()`; validation never mutates it.
pub struct Grammar {
    fragments: Vec<Fragment>,
    groups: Vec<Vec<FragId>>,
    root: Vec<GroupId>,
}

/// Arena-building helper so table definitions stay declarative.
struct Builder {
    fragments: Vec<Fragment>,
    groups: Vec<Vec<FragId>>,
}

impl Builder {
    fn new() -> Self {
        Self {
            fragments: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Adds one group of fragments; entries are
    /// (input char, rendered text, submittable, follower groups).
    fn group(&mut self, entries: Vec<(char, String, bool, Vec<GroupId>)>) -> GroupId {
        let mut members = Vec::with_capacity(entries.len());
        for (input, output, submittable, followers) in entries {
            members.push(self.fragments.len());
            self.fragments.push(Fragment {
                input,
                output,
                submittable,
                followers,
            });
        }
        self.groups.push(members);
        self.groups.len() - 1
    }

    /// Digit group `0`–`9`: rendering is `prefix` + digit + `suffix`.
    fn digits(&mut self, prefix: &str, suffix: &str, followers: Vec<GroupId>) -> GroupId {
        let entries = ('0'..='9')
            .map(|d| {
                (
                    d,
                    format!("{}{}{}", prefix, d, suffix),
                    true,
                    followers.clone(),
                )
            })
            .collect();
        self.group(entries)
    }
}

impl Grammar {
    /// Builds the atc command graph.
    pub fn new() -> Self {
        let mut b = Builder::new();

        // Landmark numbers that end a command outright.
        let landmarks_terminal = b.digits("", "", vec![]);

        // "at beacon #n" delay clause, attachable after most commands.
        let delay_targets = b.group(vec![
            ('b', " beacon #".into(), false, vec![landmarks_terminal]),
            ('*', " beacon #".into(), false, vec![landmarks_terminal]),
        ]);
        let delay = b.group(vec![('a', " at".into(), false, vec![delay_targets])]);

        // Altitudes: absolute levels and climb/descend deltas.
        let altnum_absolute = b.digits(" ", "000 feet", vec![]);
        let altnum_relative = b.digits(" ", "000 ft", vec![]);
        let altmods = b.group(vec![
            ('c', " climb".into(), false, vec![altnum_relative]),
            ('+', " climb".into(), false, vec![altnum_relative]),
            ('d', " descend".into(), false, vec![altnum_relative]),
            ('-', " descend".into(), false, vec![altnum_relative]),
        ]);

        // Compass directions on the qweadzxc rose.
        let compass = [
            ('q', 315),
            ('w', 0),
            ('e', 45),
            ('a', 270),
            ('d', 90),
            ('z', 225),
            ('x', 180),
            ('c', 135),
        ];
        let directions_absolute = b.group(
            compass
                .iter()
                .map(|&(ch, deg)| (ch, format!(" to {}", deg), true, vec![delay]))
                .collect(),
        );
        // No 'a' here: after "turn left/right" it would shadow "at".
        let directions_relative = b.group(
            compass
                .iter()
                .filter(|&&(ch, _)| ch != 'a')
                .map(|&(ch, deg)| (ch, format!(" {}", deg), true, vec![delay]))
                .collect(),
        );

        // Turns: sharp 90s, soft turns with optional angles, landmarks.
        let turns_sharp = b.group(vec![
            ('L', " left 90".into(), true, vec![delay]),
            ('R', " right 90".into(), true, vec![delay]),
        ]);
        let turns_normal = b.group(vec![
            ('l', " left".into(), true, vec![delay, directions_relative]),
            ('r', " right".into(), true, vec![delay, directions_relative]),
        ]);
        let landmarks_delayable = b.digits("", "", vec![delay]);
        let turn_landmarks = b.group(vec![
            ('a', " airport #".into(), false, vec![landmarks_delayable]),
            ('b', " beacon #".into(), false, vec![landmarks_delayable]),
            ('e', " exit #".into(), false, vec![landmarks_delayable]),
            ('*', " beacon #".into(), false, vec![landmarks_delayable]),
        ]);
        let towards = b.group(vec![('t', " towards".into(), false, vec![turn_landmarks])]);

        // The command verbs.
        let commands = b.group(vec![
            (
                'a',
                " altitude:".into(),
                false,
                vec![altnum_absolute, altmods],
            ),
            ('m', " mark".into(), true, vec![]),
            ('i', " ignore".into(), true, vec![]),
            ('u', " unmark".into(), true, vec![]),
            ('c', " circle".into(), true, vec![]),
            (
                't',
                " turn".into(),
                false,
                vec![turns_sharp, turns_normal, directions_absolute, towards],
            ),
        ]);

        // Every command starts with a plane letter.
        let planes = b.group(
            ('a'..='z')
                .chain('A'..='Z')
                .map(|ch| (ch, format!("{}:", ch), false, vec![commands]))
                .collect(),
        );

        Grammar {
            fragments: b.fragments,
            groups: b.groups,
            root: vec![planes],
        }
    }

    /// The process-wide shared instance.
    pub fn shared() -> &'static Grammar {
        static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
        GRAMMAR.get_or_init(Grammar::new)
    }

    /// Validates a typed string.
    ///
    /// Returns None when the string is not a prefix of any command, or when
    /// its rendering would exceed the rendered-text capacity. The walk is
    /// deterministic: at most one fragment in the current follower set can
    /// match each character.
    pub fn validate(&self, typed: &str) -> Option<Validation> {
        // The empty string is acceptable and submittable (sends a bare
        // line, which the game treats as a no-op keypress).
        if typed.is_empty() {
            return Some(Validation {
                rendering: String::new(),
                submittable: true,
            });
        }

        // Chat bypasses the grammar: valid from the lone escape onward,
        // submittable once any text follows it.
        if let Some(rest) = typed.strip_prefix(CHAT_ESCAPE) {
            let rendering = format!("chat: {}", rest);
            if rendering.len() > MAX_RENDERED {
                return None;
            }
            return Some(Validation {
                rendering,
                submittable: !rest.is_empty(),
            });
        }

        let mut follower_groups: &[GroupId] = &self.root;
        let mut rendering = String::new();
        let mut submittable = false;

        for ch in typed.chars() {
            let frag = self.find(follower_groups, ch)?;
            if rendering.len() + frag.output.len() > MAX_RENDERED {
                return None;
            }
            rendering.push_str(&frag.output);
            submittable = frag.submittable;
            follower_groups = &frag.followers;
        }

        Some(Validation {
            rendering,
            submittable,
        })
    }

    fn find(&self, follower_groups: &[GroupId], input: char) -> Option<&Fragment> {
        follower_groups
            .iter()
            .flat_map(|&group| self.groups[group].iter())
            .map(|&id| &self.fragments[id])
            .find(|frag| frag.input == input)
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}
