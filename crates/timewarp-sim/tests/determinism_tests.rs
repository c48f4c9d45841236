//! Determinism: identical inputs must produce identical runs.

use proptest::prelude::*;
use timewarp_sim::{
    Definition, MatchAction, MatchRule, RunOptions, SendPattern, SimConfig, SimStats, Simulation,
};
use timewarp_types::Payload;

/// Builds and runs the reference topology, returning stats and trace.
fn run_once(duration: u64, trace: bool) -> (SimStats, Vec<timewarp_types::TraceEvent>) {
    let config = if trace {
        SimConfig::new().with_trace()
    } else {
        SimConfig::new()
    };
    let mut sim = Simulation::new(config);
    sim.add_actor(
        Definition::new("producer")
            .with_pattern(SendPattern::Periodic {
                interval_ms: 100,
                message: Payload::atom("ping"),
            })
            .with_targets(["echo", "sink"]),
    )
    .unwrap();
    sim.add_actor(
        Definition::new("echo").with_rule(MatchRule::literal(
            Payload::atom("ping"),
            MatchAction::Reply(Payload::atom("pong")),
        )),
    )
    .unwrap();
    sim.add_actor(
        Definition::new("bursty")
            .with_pattern(SendPattern::Burst {
                count: 3,
                period_ms: 250,
                message: Payload::atom("blob"),
            })
            .with_targets(["sink"]),
    )
    .unwrap();
    sim.add_actor(Definition::new("sink")).unwrap();

    sim.run(RunOptions::new().duration(duration)).unwrap();
    let result = (sim.get_stats(), sim.get_trace());
    sim.stop();
    result
}

fn counts(stats: &SimStats) -> Vec<(String, u64, u64)> {
    stats
        .actors
        .iter()
        .map(|(name, s)| (name.clone(), s.sent_count, s.received_count))
        .collect()
}

#[test]
fn identical_runs_yield_identical_stats() {
    let (first, _) = run_once(2000, false);
    let (second, _) = run_once(2000, false);
    assert_eq!(counts(&first), counts(&second));
}

#[test]
fn identical_runs_yield_identical_traces() {
    let (_, first) = run_once(1000, true);
    let (_, second) = run_once(1000, true);
    assert_eq!(first, second);

    // Trace timestamps never move backwards.
    for pair in first.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[test]
fn expected_counts_for_the_reference_topology() {
    let (stats, _) = run_once(1000, false);

    // producer: ticks at 100..=1000, two targets each.
    assert_eq!(stats.actor("producer").unwrap().sent_count, 20);
    // echo: one ping per tick, one pong back.
    assert_eq!(stats.actor("echo").unwrap().received_count, 10);
    assert_eq!(stats.actor("echo").unwrap().sent_count, 10);
    // bursty: bursts at 250, 500, 750, 1000 of three copies.
    assert_eq!(stats.actor("bursty").unwrap().sent_count, 12);
    // sink: 10 pings + 12 blobs.
    assert_eq!(stats.actor("sink").unwrap().received_count, 22);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever interval and duration we pick, two identical runs agree,
    /// and the producer's count is exactly `duration / interval`.
    #[test]
    fn periodic_count_is_duration_over_interval(
        interval in 1u64..500,
        duration in 1u64..5_000,
    ) {
        let build = |interval: u64| {
            let mut sim = Simulation::new(SimConfig::new());
            sim.add_actor(
                Definition::new("producer")
                    .with_pattern(SendPattern::Periodic {
                        interval_ms: interval,
                        message: Payload::atom("tick"),
                    })
                    .with_targets(["consumer"]),
            )
            .unwrap();
            sim.add_actor(Definition::new("consumer")).unwrap();
            sim
        };

        let mut first = build(interval);
        first.run(RunOptions::new().duration(duration)).unwrap();
        let first_stats = first.get_stats();
        first.stop();

        let mut second = build(interval);
        second.run(RunOptions::new().duration(duration)).unwrap();
        let second_stats = second.get_stats();
        second.stop();

        let expected = duration / interval;
        prop_assert_eq!(first_stats.actor("producer").unwrap().sent_count, expected);
        prop_assert_eq!(
            first_stats.actor("consumer").unwrap().received_count,
            expected
        );
        prop_assert_eq!(counts(&first_stats), counts(&second_stats));
    }
}
