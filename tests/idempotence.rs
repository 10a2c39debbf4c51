//! Property tests: the built-in patch set is idempotent for any text
//! surrounding the anchors, and never touches text it was not asked to.

use prompt_patcher::{builtin, patch, PatchSet};
use proptest::prelude::*;

const IMPORT: &str = "const newsPrompt = require('../prompts/news.prompt');\n";
const NEWS_BLOCK: &str = "            news: {
                name: 'News',
                description: 'News portal or magazine website',
                icon: '📰'
            }
";
const PROMPT_MAP: &str = "            blog: blogPrompt,
            event: eventPrompt,
            news: newsPrompt
";

fn set() -> PatchSet {
    builtin().expect("builtin")
}

/// Filler that cannot contain an anchor or a guard.
fn filler() -> impl Strategy<Value = String> {
    "[a-z0-9 ;=(){}\n]{0,64}"
}

proptest! {
    #[test]
    fn patch_twice_equals_patch_once(
        head in filler(),
        middle in filler(),
        tail in filler(),
    ) {
        let text = format!("{head}\n{IMPORT}{middle}\n{NEWS_BLOCK}{middle}\n{PROMPT_MAP}{tail}");
        let set = set();

        let once = patch(&text, &set).unwrap();
        let twice = patch(&once.text, &set).unwrap();

        prop_assert_eq!(&twice.text, &once.text);
        prop_assert!(twice.is_noop());
        prop_assert_eq!(once.applied_count(), 3);
    }

    #[test]
    fn surrounding_text_is_preserved(
        head in filler(),
        tail in filler(),
    ) {
        let text = format!("{head}\n{IMPORT}{NEWS_BLOCK}{PROMPT_MAP}{tail}");
        let patched = patch(&text, &set()).unwrap().text;
        let prefix = format!("{head}\n");

        prop_assert!(patched.starts_with(&prefix));
        prop_assert!(patched.ends_with(&tail));
    }

    #[test]
    fn text_without_anchors_is_never_modified(text in filler()) {
        // Either fully patched or untouched: a failure yields no text at all
        prop_assert!(patch(&text, &set()).is_err());
    }
}
