//! Selective forwarding of one peer's audio to the rest of its room.
//!
//! Membership is re-snapshotted for every packet: a member that leaves is
//! skipped from the next packet on, and a member without a sink for this
//! source (not negotiated yet) simply misses the packet. Nothing is
//! buffered or retried. Members that negotiate while a source is already
//! live get their sink from `attach_active_sources`.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::media::{IncomingStream, MediaBinding, MediaSink, StreamParams};
use crate::metrics::RelayStats;
use crate::peer::Peer;

/// Pumps `stream` from `source` to every other room member until the
/// stream ends.
pub async fn relay_stream(source: Arc<Peer>, stream: Arc<dyn IncomingStream>) -> RelayStats {
    let params = stream.params();
    info!(
        peer = %source.identity(),
        codec = %params.mime_type,
        "relaying incoming stream"
    );

    let generation = source.begin_publishing(params.clone());
    let room = source.room();
    let sinks = install_sinks(&source, &params).await;
    let mut stats = RelayStats {
        sinks_created: sinks.len() as u64,
        ..Default::default()
    };

    loop {
        let packet = match stream.read_packet().await {
            Ok(packet) => packet,
            Err(e) => {
                debug!(peer = %source.identity(), error = %e, "incoming stream ended");
                break;
            }
        };
        stats.packets_read += 1;

        let room = match source.room() {
            Some(room) => room,
            None => {
                debug!(peer = %source.identity(), "source left its room, stopping relay");
                break;
            }
        };
        for dest in room.members_snapshot() {
            if dest.identity() == source.identity() {
                continue;
            }
            match dest.sink_for(source.identity()) {
                Some(sink) => match sink.write(&packet).await {
                    Ok(()) => stats.packets_forwarded += 1,
                    Err(e) => {
                        stats.write_errors += 1;
                        debug!(
                            peer = %source.identity(),
                            dest = %dest.identity(),
                            error = %e,
                            "relay write failed"
                        );
                    }
                },
                None => stats.packets_dropped += 1,
            }
        }
    }

    if source.end_publishing(generation) {
        // Still the live stream: every sink for this source is ours,
        // including those wired up for late joiners.
        if let Some(room) = room {
            for dest in room.members_snapshot() {
                dest.remove_sink(source.identity());
            }
        }
    }
    for (dest, sink) in sinks {
        if let Some(dest) = dest.upgrade() {
            dest.remove_sink_if(source.identity(), &sink);
        }
    }
    info!(
        peer = %source.identity(),
        read = stats.packets_read,
        forwarded = stats.packets_forwarded,
        dropped = stats.packets_dropped,
        write_errors = stats.write_errors,
        loss = format_args!("{:.1}%", stats.loss_rate()),
        "relay stopped"
    );
    stats
}

/// Creates and attaches one sink per other member that has a media binding,
/// then kicks off a renegotiation for each without waiting on it.
async fn install_sinks(
    source: &Arc<Peer>,
    params: &StreamParams,
) -> Vec<(Weak<Peer>, Arc<dyn MediaSink>)> {
    let mut installed = Vec::new();
    let room = match source.room() {
        Some(room) => room,
        None => return installed,
    };

    for dest in room.members_snapshot() {
        if dest.identity() == source.identity() {
            continue;
        }
        let binding = match dest.binding() {
            Some(binding) => binding,
            None => {
                debug!(dest = %dest.identity(), "no media binding yet, no sink");
                continue;
            }
        };
        if let Some(sink) = wire_sink(&dest, &binding, source.identity(), params).await {
            spawn_renegotiation(&dest);
            installed.push((Arc::downgrade(&dest), sink));
        }
    }
    installed
}

/// Gives a member that just got its media binding a sink for every other
/// member already publishing, then renegotiates once.
pub(crate) async fn attach_active_sources(dest: &Arc<Peer>) {
    let (room, binding) = match (dest.room(), dest.binding()) {
        (Some(room), Some(binding)) => (room, binding),
        _ => return,
    };

    let mut attached = 0usize;
    for source in room.members_snapshot() {
        if source.identity() == dest.identity() || dest.sink_for(source.identity()).is_some() {
            continue;
        }
        let params = match source.published_params() {
            Some(params) => params,
            None => continue,
        };
        if wire_sink(dest, &binding, source.identity(), &params)
            .await
            .is_some()
        {
            attached += 1;
        }
    }
    if attached > 0 {
        debug!(peer = %dest.identity(), sources = attached, "joined live sources");
        spawn_renegotiation(dest);
    }
}

async fn wire_sink(
    dest: &Arc<Peer>,
    binding: &Arc<dyn MediaBinding>,
    source: &str,
    params: &StreamParams,
) -> Option<Arc<dyn MediaSink>> {
    let sink = match binding.create_sink(source, params).await {
        Ok(sink) => sink,
        Err(e) => {
            warn!(dest = %dest.identity(), error = %e, "could not create relay sink");
            return None;
        }
    };
    dest.install_sink(source, Arc::clone(&sink));
    if let Err(e) = binding.attach_sink(Arc::clone(&sink)).await {
        warn!(dest = %dest.identity(), error = %e, "could not attach relay sink");
        dest.remove_sink_if(source, &sink);
        return None;
    }
    Some(sink)
}

fn spawn_renegotiation(dest: &Arc<Peer>) {
    let dest = Arc::clone(dest);
    tokio::spawn(async move { dest.negotiate().await });
}
