#![no_main]

use engram_backend::{MemoryScope, ScopeFilter};
use libfuzzer_sys::fuzz_target;

fn field(parts: &[&str], index: usize) -> Option<String> {
    parts
        .get(index)
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
}

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let parts: Vec<&str> = text.split('\u{0}').collect();

    let scope = MemoryScope {
        user_id: field(&parts, 0),
        agent_id: field(&parts, 1),
        run_id: field(&parts, 2),
    };
    let filter = ScopeFilter {
        user_id: field(&parts, 3),
        agent_id: field(&parts, 4),
        run_id: field(&parts, 5),
    };

    // Matching is deterministic and never panics.
    let first = filter.matches_scope(&scope);
    assert_eq!(first, filter.matches_scope(&scope));

    // The unscoped filter matches every scope.
    assert!(ScopeFilter::default().matches_scope(&scope));

    // A filter copying a scope's own dimensions always matches it: non-blank
    // values compare trim-equal and blank ones collapse to wildcards.
    let mirror = ScopeFilter {
        user_id: scope.user_id.clone(),
        agent_id: scope.agent_id.clone(),
        run_id: scope.run_id.clone(),
    };
    assert!(mirror.matches_scope(&scope));
});
