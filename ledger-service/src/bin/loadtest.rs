use rand::{seq::SliceRandom, thread_rng, RngCore};
use reqwest::Client;
use serde_json::json;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Quick-and-dirty CLI via envs
    let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let instance = std::env::var("LOTTERY_INSTANCE").unwrap_or_else(|_| "main".to_string());
    let duration_secs: u64 = std::env::var("DURATION_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30);
    let concurrency: usize = std::env::var("CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(64);
    let target_rps: Option<u64> = std::env::var("TARGET_RPS").ok().and_then(|v| v.parse().ok()).filter(|&n| n > 0);
    let wallet_count: usize = std::env::var("WALLETS").ok().and_then(|v| v.parse().ok()).unwrap_or(200);
    // Endpoint selection: comma list of round,buy
    let endpoints_csv = std::env::var("ENDPOINTS").unwrap_or_else(|_| "round,buy".to_string());
    let mut selected_labels: Vec<String> = Vec::new();
    for part in endpoints_csv.split(',').map(|s| s.trim().to_lowercase()) {
        match part.as_str() {
            "round" => selected_labels.push("round".to_string()),
            "buy" => selected_labels.push("buy".to_string()),
            _ => {}
        }
    }
    if selected_labels.is_empty() {
        anyhow::bail!("ENDPOINTS produced no valid entries");
    }
    // Optional weights like "round=4,buy=1"
    let weights_map: std::collections::HashMap<String, u32> = std::env::var("ENDPOINT_WEIGHTS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|kv| {
                    let mut it = kv.split('=');
                    let k = it.next()?.trim().to_lowercase();
                    let v: u32 = it.next()?.trim().parse().ok()?;
                    Some((k, v.max(1)))
                })
                .collect()
        })
        .unwrap_or_default();
    // Build a simple sampling bag of endpoint indices per weight
    let mut pick_bag: Vec<usize> = Vec::new();
    for (idx, name) in selected_labels.iter().enumerate() {
        let w = *weights_map.get(name).unwrap_or(&1);
        for _ in 0..w { pick_bag.push(idx); }
    }
    if pick_bag.is_empty() { anyhow::bail!("No endpoints to pick from"); }

    println!("BASE_URL={}", base_url);
    println!("LOTTERY_INSTANCE={}", instance);
    println!(
        "DURATION_SECS={} CONCURRENCY={} {}",
        duration_secs,
        concurrency,
        target_rps
            .map(|r| format!("TARGET_RPS={}", r))
            .unwrap_or_else(|| "(best-effort firehose)".to_string())
    );
    println!("ENDPOINTS={}", selected_labels.join(","));

    // Synthesize buyer wallets: random 32-byte keys, base58-encoded
    let wallets: Vec<String> = {
        let mut rng = thread_rng();
        (0..wallet_count.max(1))
            .map(|_| {
                let mut key = [0u8; 32];
                rng.fill_bytes(&mut key);
                bs58::encode(key).into_string()
            })
            .collect()
    };
    println!("Synthesized {} wallets", wallets.len());

    let client = Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(10_000)
        .tcp_nodelay(true)
        .timeout(Duration::from_secs(15))
        .build()?;

    let start_at = Instant::now();
    let end_at = start_at + Duration::from_secs(duration_secs);
    let sem = Arc::new(Semaphore::new(concurrency));
    let mut rng = thread_rng();

    let mut tasks = Vec::with_capacity(concurrency * 2);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let issued = Arc::new(AtomicU64::new(0));

    let labels_for_stats = selected_labels.clone();
    let issued_for_stats = issued.clone();
    let stats_handle = tokio::spawn(async move {
        let mut ok = 0u64;
        let mut err = 0u64;
        let mut ok_per: Vec<u64> = vec![0; labels_for_stats.len()];
        let mut err_per: Vec<u64> = vec![0; labels_for_stats.len()];
        let mut latencies_ms: Vec<u128> = Vec::new();
        while let Some((success, ms, idx)) = rx.recv().await {
            if success { ok += 1; ok_per[idx] += 1; } else { err += 1; err_per[idx] += 1; }
            latencies_ms.push(ms);
        }
        latencies_ms.sort_unstable();
        let p = |q: f64| -> u128 {
            if latencies_ms.is_empty() { return 0; }
            let idx = ((latencies_ms.len() as f64 - 1.0) * q).round() as usize;
            latencies_ms[idx]
        };
        let completed = ok + err;
        let issued_total = issued_for_stats.load(Ordering::Relaxed);
        let elapsed = start_at.elapsed().as_secs_f64();
        let qps = if elapsed > 0.0 { completed as f64 / elapsed } else { 0.0 };
        println!("Summary: issued={} completed={} ok={} err={} p50={}ms p90={}ms p99={}ms qps={:.1}",
            issued_total, completed, ok, err, p(0.50), p(0.90), p(0.99), qps);
        for (i, name) in labels_for_stats.iter().enumerate() {
            println!("  {}: ok={} err={} total={}", name, ok_per[i], err_per[i], ok_per[i] + err_per[i]);
        }
    });

    // Producer loop
    if let Some(rps) = target_rps {
        let mut ticker = interval(Duration::from_nanos(1_000_000_000 / rps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while Instant::now() < end_at {
            ticker.tick().await;
            let permit = sem.clone().acquire_owned().await.unwrap();
            issued.fetch_add(1, Ordering::Relaxed);
            // Pick an endpoint (weighted by pick_bag)
            let idx = *pick_bag.choose(&mut rng).unwrap();
            let (url, body, label_idx) = match selected_labels[idx].as_str() {
                "round" => {
                    let url = format!("{}/round?instance={}", base_url, instance);
                    (url, None, idx)
                }
                _ => {
                    let wallet = wallets.choose(&mut rng).unwrap();
                    let url = format!("{}/tickets", base_url);
                    let body = json!({ "walletAddress": wallet, "instance": instance });
                    (url, Some(body), idx)
                }
            };

            let client_ref = client.clone();
            let tx_ref = tx.clone();
            let permit_ref = permit;
            tokio::spawn(async move {
                let started = Instant::now();
                let resp = match &body {
                    Some(b) => client_ref.post(&url).json(b).send().await,
                    None => client_ref.get(&url).send().await,
                };
                let elapsed = started.elapsed().as_millis();
                let ok = match &resp {
                    Ok(r) => r.status().is_success(),
                    Err(_) => false,
                };
                let _ = tx_ref.send((ok, elapsed, label_idx));
                drop(permit_ref);
                if !ok {
                    match resp {
                        Ok(r) => eprintln!("err {}ms {} status={}", elapsed, url, r.status()),
                        Err(e) => eprintln!("err {}ms {} net={}", elapsed, url, e),
                    }
                }
            });
        }
    } else {
        while Instant::now() < end_at {
            let permit = sem.clone().acquire_owned().await.unwrap();
            issued.fetch_add(1, Ordering::Relaxed);
            // Pick an endpoint (weighted by pick_bag)
            let idx = *pick_bag.choose(&mut rng).unwrap();
            let (url, body, label_idx) = match selected_labels[idx].as_str() {
                "round" => {
                    let url = format!("{}/round?instance={}", base_url, instance);
                    (url, None, idx)
                }
                _ => {
                    let wallet = wallets.choose(&mut rng).unwrap();
                    let url = format!("{}/tickets", base_url);
                    let body = json!({ "walletAddress": wallet, "instance": instance });
                    (url, Some(body), idx)
                }
            };

            let client_ref = client.clone();
            let tx_ref = tx.clone();
            let permit_ref = permit;
            tasks.push(tokio::spawn(async move {
                let started = Instant::now();
                let resp = match &body {
                    Some(b) => client_ref.post(&url).json(b).send().await,
                    None => client_ref.get(&url).send().await,
                };
                let elapsed = started.elapsed().as_millis();
                let ok = match &resp {
                    Ok(r) => r.status().is_success(),
                    Err(_) => false,
                };
                let _ = tx_ref.send((ok, elapsed, label_idx));
                drop(permit_ref);
                if !ok {
                    match resp {
                        Ok(r) => eprintln!("err {}ms {} status={}", elapsed, url, r.status()),
                        Err(e) => eprintln!("err {}ms {} net={}", elapsed, url, e),
                    }
                }
            }));
        }
    }

    // Close the stats channel so the summary prints
    drop(tx);

    // Wait a bit for tasks to finish
    for t in tasks {
        let _ = t.await;
    }

    // Ensure stats are printed before exit
    let _ = stats_handle.await;

    Ok(())
}
