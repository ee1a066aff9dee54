//! Ranking stage: full round-robin Elo tournaments per bucket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use keeper_models::{
    BucketId, JobStatus, MediaFile, MediaId, MediaType, TournamentMatch, INITIAL_RATING,
};
use keeper_vision::MediaPayload;

use crate::context::JobContext;
use crate::elo;
use crate::error::{PipelineError, PipelineResult};
use crate::stages::drain_workers;

/// How many members of a bucket become top picks.
const TOP_PICKS_PER_BUCKET: usize = 3;

/// One tournament: a bucket's members of a single media type.
struct Tournament {
    bucket_id: BucketId,
    media_type: MediaType,
    members: Vec<MediaFile>,
}

/// Run the tournaments for every bucket with at least two members of the
/// same media type. Single-member buckets are skipped and never marked as
/// picks.
pub async fn run(ctx: &JobContext) -> PipelineResult<()> {
    let buckets = ctx.records().list_buckets(&ctx.job_id).await?;
    let files = ctx.records().list_media_files(&ctx.job_id).await?;

    let mut members: HashMap<(BucketId, MediaType), Vec<MediaFile>> = HashMap::new();
    for file in files {
        if let Some(bucket_id) = &file.bucket_id {
            members
                .entry((bucket_id.clone(), file.media_type))
                .or_default()
                .push(file);
        }
    }

    let mut tournaments: Vec<Tournament> = Vec::new();
    for bucket in &buckets {
        for media_type in [MediaType::Image, MediaType::Video] {
            if let Some(group) = members.remove(&(bucket.id.clone(), media_type)) {
                if group.len() >= 2 {
                    tournaments.push(Tournament {
                        bucket_id: bucket.id.clone(),
                        media_type,
                        members: group,
                    });
                }
            }
        }
    }

    if tournaments.is_empty() {
        return Ok(());
    }

    let total_matches: u64 = tournaments
        .iter()
        .map(|t| {
            let n = t.members.len() as u64;
            n * (n - 1) / 2
        })
        .sum();
    let matches_done = Arc::new(AtomicU64::new(0));
    let members_done = Arc::new(AtomicI64::new(0));

    info!(
        "Job {}: {} tournaments, {} matches",
        ctx.job_id,
        tournaments.len(),
        total_matches
    );

    let tournament_pool = Arc::new(Semaphore::new(ctx.config().tournament_concurrency));
    let mut tasks: JoinSet<PipelineResult<()>> = JoinSet::new();

    for tournament in tournaments {
        let ctx = ctx.clone();
        let tournament_pool = Arc::clone(&tournament_pool);
        let matches_done = Arc::clone(&matches_done);
        let members_done = Arc::clone(&members_done);

        tasks.spawn(async move {
            let _permit = tournament_pool
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("tournament pool closed"))?;
            run_tournament(&ctx, tournament, total_matches, matches_done, members_done).await
        });
    }

    drain_workers(ctx, tasks).await
}

async fn run_tournament(
    ctx: &JobContext,
    tournament: Tournament,
    total_matches: u64,
    matches_done: Arc<AtomicU64>,
    members_done: Arc<AtomicI64>,
) -> PipelineResult<()> {
    ctx.check_cancelled()?;

    let payloads = fetch_payloads(ctx, &tournament.members).await?;
    let ratings: Arc<Mutex<HashMap<MediaId, f64>>> = Arc::new(Mutex::new(
        tournament
            .members
            .iter()
            .map(|m| (m.id.clone(), INITIAL_RATING))
            .collect(),
    ));

    let match_pool = Arc::new(Semaphore::new(ctx.config().match_concurrency));
    let mut matches: JoinSet<PipelineResult<()>> = JoinSet::new();

    for i in 0..tournament.members.len() {
        for j in (i + 1)..tournament.members.len() {
            let first = tournament.members[i].clone();
            let second = tournament.members[j].clone();
            let (Some(payload_a), Some(payload_b)) = (
                payloads.get(&first.id).cloned(),
                payloads.get(&second.id).cloned(),
            ) else {
                warn!(
                    "Skipping match {} vs {}: media unavailable",
                    first.filename, second.filename
                );
                continue;
            };

            let ctx = ctx.clone();
            let match_pool = Arc::clone(&match_pool);
            let ratings = Arc::clone(&ratings);
            let matches_done = Arc::clone(&matches_done);
            let bucket_id = tournament.bucket_id.clone();
            let media_type = tournament.media_type;

            matches.spawn(async move {
                let _permit = match_pool
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::job_failed("match pool closed"))?;
                ctx.check_cancelled()?;

                let verdict = match ctx
                    .model()
                    .compare_quality(&payload_a, &payload_b, media_type)
                    .await
                {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!(
                            "Match {} vs {} skipped after retries: {}",
                            first.filename, second.filename, e
                        );
                        return Ok(());
                    }
                };

                let winner_is_first = verdict.winner == 1;
                let winner_id = if winner_is_first {
                    first.id.clone()
                } else {
                    second.id.clone()
                };

                let (change1, change2, rating1, rating2) = {
                    let mut ratings = ratings.lock().expect("ratings lock poisoned");
                    let ra = ratings[&first.id];
                    let rb = ratings[&second.id];
                    let (da, db) =
                        elo::rating_deltas(ra, rb, winner_is_first, verdict.confidence);
                    let new_a = ra + da;
                    let new_b = rb + db;
                    ratings.insert(first.id.clone(), new_a);
                    ratings.insert(second.id.clone(), new_b);
                    (da, db, new_a, new_b)
                };

                let record = TournamentMatch::new(
                    bucket_id,
                    media_type,
                    1,
                    first.id.clone(),
                    second.id.clone(),
                    winner_id,
                    Some(verdict.reasoning),
                    change1,
                    change2,
                );
                ctx.records().create_match(&record).await?;
                ctx.records().set_media_rating(&first.id, rating1).await?;
                ctx.records().set_media_rating(&second.id, rating2).await?;

                let done = matches_done.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.report_stage(JobStatus::Ranking, done, total_matches, None);
                Ok(())
            });
        }
    }

    drain_workers(ctx, matches).await?;

    // Persist the final standings and mark the podium.
    let final_ratings: Vec<(MediaId, f64)> = {
        let ratings = ratings.lock().expect("ratings lock poisoned");
        tournament
            .members
            .iter()
            .map(|m| (m.id.clone(), ratings[&m.id]))
            .collect()
    };

    let mut standings = final_ratings.clone();
    standings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let picks: Vec<MediaId> = standings
        .iter()
        .take(TOP_PICKS_PER_BUCKET.min(standings.len()))
        .map(|(id, _)| id.clone())
        .collect();

    ctx.records()
        .set_ratings_and_picks(&final_ratings, &picks)
        .await?;

    let covered = members_done.fetch_add(tournament.members.len() as i64, Ordering::SeqCst)
        + tournament.members.len() as i64;
    ctx.records().set_job_progress(&ctx.job_id, covered).await?;
    Ok(())
}

/// Download every member's bytes up front; a failed download drops that
/// member from the tournament's matches but keeps it in the standings.
async fn fetch_payloads(
    ctx: &JobContext,
    members: &[MediaFile],
) -> PipelineResult<HashMap<MediaId, Arc<MediaPayload>>> {
    let mut payloads = HashMap::new();
    for member in members {
        ctx.check_cancelled()?;
        match ctx.blobs().get_bytes(&member.blob_key).await {
            Ok(bytes) => {
                payloads.insert(
                    member.id.clone(),
                    Arc::new(MediaPayload::new(bytes, member.mime_type.clone())),
                );
            }
            Err(e) => warn!("Cannot fetch {} for ranking: {}", member.filename, e),
        }
    }
    Ok(payloads)
}
