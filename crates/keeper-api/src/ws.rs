//! Upload session handler with backpressure support.
//!
//! The session speaks the duplex protocol from the upload assembler
//! design: a text `init` frame, ordered binary chunks with a 4-byte
//! big-endian index prefix, then pipeline progress frames until the job
//! reaches a terminal status.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use keeper_models::{ClientFrame, Job, JobId, JobStatus, ServerFrame};
use keeper_pipeline::ProgressEvent;

use crate::metrics;
use crate::state::AppState;

/// Global counter for active upload sessions.
static ACTIVE_UPLOAD_SESSIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Send a frame with backpressure handling.
async fn send_frame(tx: &mpsc::Sender<Message>, frame: ServerFrame) -> bool {
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(_) => return false,
    };
    // Use try_send for non-blocking, fall back to blocking send
    match tx.try_send(Message::Text(json.clone())) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("Upload session send buffer full, applying backpressure");
            tx.send(Message::Text(json)).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Upload WebSocket endpoint.
pub async fn ws_upload(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let count = ACTIVE_UPLOAD_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_active_upload_sessions(count);
    metrics::record_upload_session();

    ws.on_upgrade(|socket| async move {
        handle_upload_socket(socket, state).await;
        let count = ACTIVE_UPLOAD_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_upload_sessions(count);
    })
}

/// Handle one upload session.
async fn handle_upload_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel so a slow client cannot pile frames up in memory
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        ws_sender
    });

    // First frame must be the init control frame
    let init = match tokio::time::timeout(WS_CLIENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = send_frame(&tx, ServerFrame::error(format!("Invalid init frame: {e}"))).await;
                drop(tx);
                let _ = send_task.await;
                return;
            }
        },
        Ok(Some(Ok(Message::Binary(_)))) => {
            let _ = send_frame(&tx, ServerFrame::error("no active upload session")).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
        Ok(_) | Err(_) => {
            let _ = send_frame(
                &tx,
                ServerFrame::error("Expected init frame or connection timeout"),
            )
            .await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let ClientFrame::Init {
        total_chunks,
        total_size,
        job_id,
        name,
    } = init;

    if total_chunks == 0 {
        let _ = send_frame(&tx, ServerFrame::error("totalChunks must be positive")).await;
        drop(tx);
        let _ = send_task.await;
        return;
    }

    // Adopt a pre-allocated job or create one for this session
    let job = match resolve_job(&state, job_id, name).await {
        Ok(job) => job,
        Err(message) => {
            let _ = send_frame(&tx, ServerFrame::error(message)).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    info!(
        "Upload session started for job {} ({} chunks, {} bytes)",
        job.id, total_chunks, total_size
    );

    let scratch_path = state.pipeline_config.scratch_path(&job.id);
    let mut scratch = match tokio::fs::File::create(&scratch_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot allocate scratch file for {}: {}", job.id, e);
            let _ = state.records.fail_job(&job.id, "could not allocate scratch file").await;
            let _ = send_frame(&tx, ServerFrame::error("could not allocate scratch file")).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    send_frame(
        &tx,
        ServerFrame::status_update(job.id.clone(), JobStatus::Uploading, 0, 0),
    )
    .await;

    // Chunk loop. Frames of one WebSocket connection ride a single TCP
    // stream and arrive in order; the 4-byte index is accounting only and
    // must match the arrival position.
    let mut received: u32 = 0;
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    let upload_ok = loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() < 4 {
                            let _ = send_frame(&tx, ServerFrame::error("binary frame too short")).await;
                            let _ = state.records.fail_job(&job.id, "malformed upload chunk").await;
                            break false;
                        }
                        let index = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                        if index != received {
                            let message = format!(
                                "chunk index {index} does not match arrival position {received}"
                            );
                            let _ = send_frame(&tx, ServerFrame::error(message.clone())).await;
                            let _ = state.records.fail_job(&job.id, message).await;
                            break false;
                        }

                        if let Err(e) = scratch.write_all(&data[4..]).await {
                            warn!("Scratch write failed for {}: {}", job.id, e);
                            let _ = send_frame(&tx, ServerFrame::error("failed to store chunk")).await;
                            let _ = state.records.fail_job(&job.id, "failed to store upload chunk").await;
                            break false;
                        }

                        received += 1;
                        metrics::record_upload_chunk(data.len() - 4);
                        send_frame(
                            &tx,
                            ServerFrame::chunk_ack(job.id.clone(), index, received, total_chunks),
                        )
                        .await;

                        if received == total_chunks {
                            break true;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        debug!("Ignoring text frame during chunk transfer");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Disconnect mid-upload: the job stays in
                        // `uploading` until boot-time recovery fails it.
                        info!("Upload session for {} closed after {} chunks", job.id, received);
                        break false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Upload session error for {}: {}", job.id, e);
                        break false;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Heartbeat failed, client disconnected");
                    break false;
                }
            }
        }
    };

    if !upload_ok {
        drop(scratch);
        tokio::fs::remove_file(&scratch_path).await.ok();
        drop(tx);
        let _ = send_task.await;
        return;
    }

    if let Err(e) = scratch.flush().await {
        warn!("Scratch flush failed for {}: {}", job.id, e);
        let _ = state.records.fail_job(&job.id, "failed to finalize scratch file").await;
        let _ = send_frame(&tx, ServerFrame::error("failed to finalize upload")).await;
        tokio::fs::remove_file(&scratch_path).await.ok();
        drop(tx);
        let _ = send_task.await;
        return;
    }
    drop(scratch);

    info!("Upload complete for job {}, handing to pipeline", job.id);

    // Subscribe before enqueueing so no progress event is missed
    let mut events = state.progress.subscribe(&job.id);
    if let Err(e) = state
        .records
        .advance_job_status(&job.id, JobStatus::Extracting)
        .await
    {
        warn!("Could not advance job {}: {}", job.id, e);
        let _ = send_frame(&tx, ServerFrame::error("failed to start processing")).await;
        drop(tx);
        let _ = send_task.await;
        return;
    }
    state.orchestrator.enqueue(job.id.clone());

    send_frame(
        &tx,
        ServerFrame::status_update(job.id.clone(), JobStatus::Extracting, 0, 0),
    )
    .await;

    forward_progress(&tx, &mut receiver, &mut events, &job.id).await;

    drop(tx);
    let _ = send_task.await;
    info!("Upload session ended for job {}", job.id);
}

/// Forward pipeline progress frames until the job reaches a terminal
/// status or the client goes away.
async fn forward_progress(
    tx: &mpsc::Sender<Message>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    events: &mut tokio::sync::broadcast::Receiver<ProgressEvent>,
    job_id: &JobId,
) {
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ProgressEvent::Status { status, processed, total }) => {
                        if !send_frame(
                            tx,
                            ServerFrame::status_update(job_id.clone(), status, processed, total),
                        )
                        .await
                        {
                            break;
                        }
                        if status.is_terminal() {
                            break;
                        }
                    }
                    Ok(ProgressEvent::Stage { stage, current, total, message }) => {
                        if !send_frame(
                            tx,
                            ServerFrame::processing_progress(
                                job_id.clone(),
                                stage.as_str(),
                                current,
                                total,
                                message,
                            ),
                        )
                        .await
                        {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Upload session for {} lagged {} events", job_id, skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Heartbeat failed, client disconnected");
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed connection for {}", job_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Resolve the job for a session: adopt the pre-allocated one or create a
/// fresh record.
async fn resolve_job(
    state: &AppState,
    job_id: Option<JobId>,
    name: Option<String>,
) -> Result<Job, String> {
    match job_id {
        Some(id) => {
            let job = state
                .records
                .get_job(&id)
                .await
                .map_err(|e| format!("failed to load job: {e}"))?
                .ok_or_else(|| format!("job {id} not found"))?;
            if job.status != JobStatus::Uploading {
                return Err(format!("job {id} is not awaiting an upload"));
            }
            Ok(job)
        }
        None => {
            let job = Job::new(name);
            state
                .records
                .create_job(&job)
                .await
                .map_err(|e| format!("failed to create job: {e}"))?;
            metrics::record_job_created();
            Ok(job)
        }
    }
}
