#![no_main]

use libfuzzer_sys::fuzz_target;
use rslock::{LockDuration, LockError, LockManager, LockManagerConfig, LockMode};
use rslock::WaitPolicy;
use std::collections::HashMap;

const OWNERS: u8 = 4;
const TARGETS: u8 = 8;

// Each operation is three bytes: opcode, owner/target, mode.
fuzz_target!(|data: &[u8]| {
    let config = LockManagerConfig {
        load_factor: 0.05,
        ..Default::default()
    };
    let manager: LockManager<u8, u8> = LockManager::new(config).unwrap();
    // Expected reference counts per (owner, target).
    let mut held: HashMap<(u8, u8), u32> = HashMap::new();

    for op in data.chunks_exact(3) {
        let owner = op[1] % OWNERS;
        let target = (op[1] / OWNERS) % TARGETS;
        let mode = LockMode::ALL[1 + (op[2] as usize % (LockMode::ALL.len() - 1))];

        match op[0] % 4 {
            0 | 1 => {
                let duration = if op[0] % 4 == 0 {
                    LockDuration::Manual
                } else {
                    LockDuration::Instant
                };
                match manager.acquire(owner, target, mode, duration, WaitPolicy::NoWait) {
                    Ok(handle) => {
                        assert!(handle.mode().covers(mode));
                        if duration == LockDuration::Manual {
                            *held.entry((owner, target)).or_insert(0) += 1;
                        }
                    }
                    Err(LockError::LockDenied { .. }) => {}
                    Err(e) => panic!("unexpected acquire error: {e}"),
                }
            }
            2 => {
                let result = manager.release(&owner, &target);
                match held.get_mut(&(owner, target)) {
                    Some(count) => {
                        *count -= 1;
                        assert_eq!(result, Ok(*count == 0));
                        if *count == 0 {
                            held.remove(&(owner, target));
                        }
                    }
                    None => assert!(matches!(result, Err(LockError::InvalidRelease { .. }))),
                }
            }
            _ => {
                manager.resize();
            }
        }

        if let Some(info) = manager.lock_info(&target) {
            let group = info
                .requests
                .iter()
                .fold(LockMode::None, |group, r| group.join(r.mode));
            assert_eq!(info.group_mode, group);
            for a in &info.requests {
                for b in &info.requests {
                    if a.owner != b.owner {
                        assert!(a.mode.is_compatible(b.mode));
                    }
                }
            }
        }
    }

    for ((owner, target), count) in held {
        for _ in 0..count {
            manager.release(&owner, &target).unwrap();
        }
    }
    assert_eq!(manager.item_count(), 0);
    manager.shutdown().unwrap();
});
