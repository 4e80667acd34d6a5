use std::convert::Infallible;
use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::Quota;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use shot_retry::RateLimitConfig;
use shot_retry::RateLimiter;
use shot_retry::SlidingWindowCounter;
use shot_retry::TokenBucket;

/// One admission decision, so every contender runs through the same harness.
trait Admit: Send + Sync {
    fn admit(&self) -> bool;
}

impl Admit for TokenBucket {
    fn admit(&self) -> bool {
        self.consume(1.0)
    }
}

impl Admit for SlidingWindowCounter {
    fn admit(&self) -> bool {
        self.record(1)
    }
}

// The whole retry loop on its fast path: tokens available, operation succeeds.
impl Admit for RateLimiter {
    fn admit(&self) -> bool {
        self.execute_blocking(|| Ok::<_, Infallible>(())).is_ok()
    }
}

#[derive(Debug)]
struct GovernorAdmit {
    limiter: governor::RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl Admit for GovernorAdmit {
    fn admit(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

fn bench_single<A: Admit>(group_name: &str, c: &mut Criterion, admit: Arc<A>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(admit.as_ref()).admit();
        })
    });

    group.finish();
}

fn bench_parallel<A: Admit + 'static>(group_name: &str, c: &mut Criterion, admit: Arc<A>) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{threads}-threads")),
            &threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let a = Arc::clone(&admit);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                let _ = black_box(a.admit());
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit_val = 1_000_000;
    let config = RateLimitConfig::builder()
        .initial_tokens(limit_val as f64)
        .refill_rate(limit_val as f64)
        .build()
        .unwrap();

    let tb = Arc::new(TokenBucket::new(&config));
    let sw = Arc::new(
        SlidingWindowCounter::new(
            Duration::from_secs(60),
            NonZeroUsize::new(limit_val).unwrap(),
        )
        .unwrap(),
    );
    let rl = Arc::new(RateLimiter::new(config));

    let gov_quota = Quota::per_minute(NonZeroU32::new(limit_val as u32).unwrap());
    let gov = Arc::new(GovernorAdmit {
        limiter: governor::RateLimiter::direct_with_clock(gov_quota, QuantaClock::default()),
    });

    bench_single("TokenBucket", c, Arc::clone(&tb));
    bench_parallel("TokenBucket", c, tb);

    bench_single("SlidingWindowCounter", c, Arc::clone(&sw));
    bench_parallel("SlidingWindowCounter", c, sw);

    bench_single("RateLimiter", c, Arc::clone(&rl));
    bench_parallel("RateLimiter", c, rl);

    bench_single("Governor", c, Arc::clone(&gov));
    bench_parallel("Governor", c, gov);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
