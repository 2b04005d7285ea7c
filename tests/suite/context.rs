//! Context management invariants over longer histories

use persona_context::{ContextConfig, ContextManager, TokenCounter};
use persona_types::Role;

const LONG_USER: &str = "I have been meaning to tell you about the trip we took last \
summer, the one where the car broke down twice before we even left the county";

fn filled(config: ContextConfig, exchanges: usize) -> ContextManager {
    let mut manager = ContextManager::new(config);
    for i in 0..exchanges {
        manager.append(Role::User, format!("{LONG_USER} ({i})"));
        manager.append(Role::Assistant, "hmm, rough.");
    }
    manager
}

#[test]
fn render_fits_every_reachable_budget() {
    let config = ContextConfig {
        max_context_tokens: 100_000,
        recent_window: 4,
        ..ContextConfig::default()
    };
    let manager = filled(config, 20);
    let counter = TokenCounter::new();

    let total = manager.history().total_tokens();
    let floor: u32 = manager
        .render(0)
        .iter()
        .map(|turn| counter.count_turn(turn.role(), turn.content()))
        .sum();

    for budget in (floor..=total).step_by(37) {
        let rendered = manager.render(budget);
        let used: u32 = rendered.iter().map(|turn| turn.token_count()).sum();
        assert!(used <= budget, "budget {budget}: used {used}");
        // Newest turn survives compaction.
        assert_eq!(rendered.last().unwrap().content(), "hmm, rough.");
    }

    // Rendering never touches stored history.
    assert_eq!(manager.history().len(), 40);
    assert!(!manager.history().has_placeholders());
}

#[test]
fn reinforcement_fires_once_per_interval() {
    let config = ContextConfig {
        reinforcement_interval: 200,
        ..ContextConfig::default()
    };
    let mut manager = ContextManager::new(config);

    let mut marks = Vec::new();
    for i in 0..30 {
        manager.append(Role::User, format!("{LONG_USER} ({i})"));
        if manager.needs_reinforcement() {
            marks.push(manager.appended_tokens());
            manager.mark_reinforced();
            assert!(!manager.needs_reinforcement());
        }
        manager.append(Role::Assistant, "hmm, rough.");
    }

    assert!(marks.len() >= 2, "{marks:?}");
    assert!(marks[0] >= 200);
    for pair in marks.windows(2) {
        assert!(pair[1] - pair[0] >= 200, "{marks:?}");
    }
    // The trigger never lags by more than one exchange.
    let since_last = manager.appended_tokens() - marks.last().unwrap();
    assert!(since_last < 200 + 100, "{since_last}");
}

#[test]
fn compaction_keeps_reinforcement_cadence() {
    let config = ContextConfig {
        max_context_tokens: 400,
        recent_window: 2,
        reinforcement_interval: 500,
        ..ContextConfig::default()
    };
    let manager = filled(config, 20);

    assert!(manager.usage().compacted);
    assert!(manager.usage().used_tokens <= 400);
    // Growth is counted on everything ever appended, not on what survived.
    assert!(manager.appended_tokens() > u64::from(manager.usage().used_tokens));
    assert!(manager.needs_reinforcement());
}
