//! Property-based tests for the shadow mirror and the dump printer
//!
//! Call chains are generated as strictly decreasing stack pointers over a
//! simulated stack, so every property runs without touching the live stack.
//!
//! Properties tested:
//! 1. Ledger ordering and stitching
//! 2. No false positives on an untouched stack
//! 3. Attribution of a single corrupted byte
//! 4. Heal idempotence and ignore purity
//! 5. Push/pop balance
//! 6. Dump accounting

use proptest::prelude::*;
use shadowstack::config::{DumpArea, DumpConfig, ReactionMode, ShadowConfig};
use shadowstack::report::{DiagnosticReporter, DumpPrinter};
use shadowstack::{BufferStack, CalleeId, CheckOutcome, Phase, ShadowError, ShadowMirror};
use termcolor::NoColor;

const BASE: usize = 0x5000_0000;
const SIZE: usize = 4096;

fn stack_pointers() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::btree_set(0..SIZE, 1..12)
        .prop_map(|set| set.into_iter().rev().map(|position| BASE + position).collect())
}

fn stack_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), SIZE)
}

fn build(bytes: Vec<u8>, sps: &[usize]) -> ShadowMirror<BufferStack> {
    let mut mirror = ShadowMirror::new(BufferStack::with_bytes(BASE, bytes));
    for (n, &sp) in sps.iter().enumerate() {
        mirror.push(CalleeId::from_addr(0x1000 + n), sp).unwrap();
    }
    mirror
}

fn check_silently(mirror: &mut ShadowMirror<BufferStack>, mode: ReactionMode) -> CheckOutcome {
    let mut config = ShadowConfig::default();
    config.reaction = mode;
    mirror.check_with(Phase::PostReturn, || config, |dump| {
        DiagnosticReporter::new(NoColor::new(Vec::new()), dump.clone()).without_backtrace()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ledger_is_stitched_and_recent_first(sps in stack_pointers()) {
        let mirror = build(vec![0; SIZE], &sps);
        let frames = mirror.frames();
        prop_assert_eq!(frames.len(), sps.len());
        prop_assert_eq!(frames[0].end(), SIZE);
        for pair in frames.windows(2) {
            prop_assert_eq!(pair[1].end(), pair[0].position);
        }

        let recent: Vec<usize> = mirror.frames_recent_first().map(|f| f.position).collect();
        let mut sorted = recent.clone();
        sorted.sort_unstable();
        prop_assert_eq!(recent, sorted);
    }

    #[test]
    fn prop_untouched_stack_is_clean(bytes in stack_bytes(), sps in stack_pointers()) {
        let mut mirror = build(bytes, &sps);
        prop_assert_eq!(check_silently(&mut mirror, ReactionMode::Report), CheckOutcome::Clean);
    }

    #[test]
    fn prop_single_corruption_is_attributed(
        bytes in stack_bytes(),
        sps in stack_pointers(),
        pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut mirror = build(bytes, &sps);
        let span = mirror.monitored_span().unwrap();
        let position = span.start + pick.index(span.len());
        let value = mirror.stack().byte(position);
        mirror.stack_mut().set_byte(position, value ^ flip);

        let outcome = check_silently(&mut mirror, ReactionMode::Ignore);
        let summary = outcome.corruption().unwrap();
        prop_assert_eq!(summary.differing_bytes, 1);
        prop_assert_eq!(summary.first_difference, position);
        prop_assert_eq!(summary.corrupted_frames.len(), 1);
        prop_assert!(summary.corrupted_frames[0].contains(position));
    }

    #[test]
    fn prop_heal_is_idempotent(
        bytes in stack_bytes(),
        sps in stack_pointers(),
        noise in prop::collection::vec((0..SIZE, any::<u8>()), 1..16),
    ) {
        let mut mirror = build(bytes, &sps);
        for (position, value) in noise {
            mirror.stack_mut().set_byte(position, value);
        }
        mirror.heal();
        prop_assert!(mirror.is_consistent());
        let healed = mirror.stack().bytes().to_vec();
        mirror.heal();
        prop_assert_eq!(mirror.stack().bytes(), &healed[..]);
    }

    #[test]
    fn prop_ignore_mode_never_mutates(
        bytes in stack_bytes(),
        sps in stack_pointers(),
        noise in prop::collection::vec((0..SIZE, any::<u8>()), 1..16),
    ) {
        let mut mirror = build(bytes, &sps);
        for (position, value) in noise {
            mirror.stack_mut().set_byte(position, value);
        }
        let before = mirror.stack().bytes().to_vec();
        check_silently(&mut mirror, ReactionMode::Ignore);
        prop_assert_eq!(mirror.stack().bytes(), &before[..]);
    }

    #[test]
    fn prop_push_pop_balance(sps in stack_pointers()) {
        let mut mirror = build(vec![0; SIZE], &sps);
        for n in (0..sps.len()).rev() {
            let frame = mirror.pop().unwrap();
            prop_assert_eq!(frame.callee, CalleeId::from_addr(0x1000 + n));
        }
        prop_assert_eq!(mirror.depth(), 0);
        prop_assert_eq!(mirror.pop(), Err(ShadowError::LedgerUnderflow));
    }

    #[test]
    fn prop_dump_accounts_for_every_byte(
        offset in 0usize..64,
        len in 1usize..512,
        width in 1usize..40,
        hide in any::<bool>(),
        flips in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let address = 0x1000 + offset;
        let actual = vec![0x5au8; len];
        let mut shadow = actual.clone();
        for flip in &flips {
            shadow[flip.index(len)] = 0;
        }
        let config = DumpConfig {
            width,
            area: DumpArea::Both,
            hide_equal_lines: hide,
            ..DumpConfig::default()
        };

        let mut out = NoColor::new(Vec::new());
        let stats = DumpPrinter::new(&config).dump(&mut out, address, &actual, &shadow).unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();

        let first_line = address - address % width;
        let total_lines = (address + len - first_line).div_ceil(width);
        prop_assert_eq!(stats.lines_shown + stats.hidden_lines, total_lines);
        prop_assert_eq!(text.lines().count(), stats.lines_shown + stats.hidden_markers);
        if !hide {
            prop_assert_eq!(stats.hidden_markers, 0);
        }
        if flips.is_empty() {
            prop_assert_eq!(stats.differing_lines, 0);
        } else {
            prop_assert!(stats.differing_lines >= 1);
        }
    }
}
