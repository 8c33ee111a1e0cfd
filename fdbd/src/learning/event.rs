// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Delivery of hardware notifications to the learning table.
//!
//! The ASIC invokes our callbacks from its own threads, where we may not
//! block.  The callbacks just package the notification as an `Event` and hand
//! it to the table's event thread, which applies it under the table lock.

use std::sync::Arc;

use slog::{debug, error, info, o, warn, Logger};
use tokio::sync::{mpsc, watch};

use aal::{
    AgingHandler, AsicError, FdbEntry, FdbIndex, FdbOps, IntfId,
    LearnHandler, VlanId,
};
use common::network::MacAddr;

use super::Inner;
use crate::types::{FdbError, FdbResult};

/// A source address punted to software for learning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LearnData {
    pub intf: IntfId,
    /// The raw hardware reason code.  Codes we don't recognize are ignored
    /// when the event is processed rather than rejected here.
    pub reason: u32,
    pub vlan: VlanId,
    pub mac: MacAddr,
    pub service_id: u32,
}

impl LearnData {
    /// Extract the learning data from a punted frame, which begins with its
    /// Ethernet header.
    pub fn decode(
        intf: IntfId,
        reason: u32,
        segment: u32,
        payload: &[u8],
    ) -> FdbResult<Self> {
        let mac = MacAddr::from_frame_src(payload).map_err(|_| {
            FdbError::Malformed(format!(
                "{} byte learning packet on intf {intf}",
                payload.len()
            ))
        })?;
        let vlan = VlanId::try_from(segment).map_err(|_| {
            FdbError::Malformed(format!("bridge domain {segment} on intf {intf}"))
        })?;
        Ok(LearnData {
            intf,
            reason,
            vlan,
            mac,
            service_id: 0,
        })
    }

    /// The forwarding entry this address should be installed as: dynamic,
    /// forwarding, not a control entry.
    pub fn entry(&self) -> FdbEntry {
        FdbEntry {
            service_id: self.service_id,
            ..FdbEntry::new(self.vlan, self.mac, self.intf)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Learn(LearnData),
    Age(FdbIndex),
    PortDown(IntfId),
    VlanRemoved(VlanId),
}

/// Queue an event without blocking.  If the queue is full, the event is
/// dropped.
pub(crate) fn post(
    log: &Logger,
    tx: &mpsc::Sender<Event>,
    event: Event,
) -> FdbResult<()> {
    tx.try_send(event).map_err(|e| match e {
        mpsc::error::TrySendError::Full(ev) => {
            warn!(log, "event queue full, dropping {ev:?}");
            FdbError::Busy("fdb event queue".into())
        }
        mpsc::error::TrySendError::Closed(ev) => {
            warn!(log, "event thread gone, dropping {ev:?}");
            FdbError::Other("fdb event thread has exited".into())
        }
    })
}

/// Queue an event, yielding the CPU for as long as the queue is full.  This
/// only fails if the event thread has exited.
pub(crate) fn post_retry(
    log: &Logger,
    tx: &mpsc::Sender<Event>,
    event: Event,
) -> FdbResult<()> {
    let mut ev = event;
    loop {
        match tx.try_send(ev) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(back)) => {
                ev = back;
                std::thread::yield_now();
            }
            Err(mpsc::error::TrySendError::Closed(back)) => {
                warn!(log, "event thread gone, dropping {back:?}");
                return Err(FdbError::Other(
                    "fdb event thread has exited".into(),
                ));
            }
        }
    }
}

/// Handle a learning notification from the ASIC.
pub fn on_learn(
    log: &Logger,
    tx: &mpsc::Sender<Event>,
    intf: IntfId,
    reason: u32,
    segment: u32,
    payload: &[u8],
) -> FdbResult<()> {
    let data =
        LearnData::decode(intf, reason, segment, payload).inspect_err(|e| {
            error!(log, "rejecting learn notification: {e}");
        })?;
    post(log, tx, Event::Learn(data))
}

/// Handle an aging notification from the ASIC.
pub fn on_age(log: &Logger, tx: &mpsc::Sender<Event>, index: FdbIndex) {
    // post() has already logged any failure, and the ASIC has nobody to
    // report it to.
    let _ = post(log, tx, Event::Age(index));
}

pub(crate) fn learn_handler(log: &Logger, tx: mpsc::Sender<Event>) -> LearnHandler {
    let log = log.clone();
    Arc::new(move |intf, reason, segment, payload| {
        on_learn(&log, &tx, intf, reason, segment, payload)
            .map_err(AsicError::from)
    })
}

pub(crate) fn aging_handler(log: &Logger, tx: mpsc::Sender<Event>) -> AgingHandler {
    let log = log.clone();
    Arc::new(move |index| on_age(&log, &tx, index))
}

/// Body of a table's event thread.  Events are applied one at a time, in the
/// order they were queued, until shutdown is signalled.  Anything still queued
/// at that point is discarded.
pub(crate) fn event_loop<H: FdbOps + 'static>(
    inner: Arc<Inner<H>>,
    mut rx: mpsc::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let log = inner.log.new(o!("unit" => "fdb_events"));
    let rt = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(log, "failed to build event runtime: {e:?}");
            return;
        }
    };

    info!(log, "fdb event processing started");
    rt.block_on(async {
        loop {
            tokio::select! {
                biased;

                r = shutdown.changed() => {
                    if r.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                ev = rx.recv() => match ev {
                    Some(ev) => inner.process(&log, ev),
                    None => break,
                },
            }
        }
    });
    info!(log, "fdb event processing finished");
}

impl<H: FdbOps> Inner<H> {
    /// Apply a single event to the table.  Failures are logged and otherwise
    /// absorbed: a misbehaving table loses entries rather than stopping.
    pub(crate) fn process(&self, log: &Logger, ev: Event) {
        let r = match ev {
            Event::Learn(data) => self.learn(&data),
            Event::Age(index) => {
                let mut table = self.table.write().unwrap();
                if table.lookup(index).is_some() {
                    table.expire(&*self.hdl, &self.log, index).map(|_| ())
                } else {
                    // Already gone
                    Ok(())
                }
            }
            Event::PortDown(intf) => {
                let n = self.table.write().unwrap().flush_by_intf(
                    &*self.hdl,
                    &self.log,
                    intf,
                );
                info!(log, "intf {intf} down, flushed {n} entries");
                Ok(())
            }
            Event::VlanRemoved(vlan) => {
                let n = self.table.write().unwrap().flush_by_vlan(
                    &*self.hdl,
                    &self.log,
                    vlan,
                );
                info!(log, "vlan {vlan} removed, flushed {n} entries");
                Ok(())
            }
        };

        match r {
            Ok(()) => {}
            Err(e) if e.is_expected() => debug!(log, "{ev:?}: {e}"),
            Err(FdbError::NotLearnable { .. }) => {}
            Err(e) => error!(log, "failed to process {ev:?}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::logger;

    fn frame(src: [u8; 6]) -> Vec<u8> {
        let mut f = vec![0xff; 6];
        f.extend_from_slice(&src);
        f.extend_from_slice(&[0x08, 0x00]);
        f.extend_from_slice(&[0u8; 46]);
        f
    }

    #[test]
    fn test_decode() {
        let src = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        let data = LearnData::decode(5, 1, 10, &frame(src)).unwrap();
        assert_eq!(data.mac, MacAddr::from(src));
        assert_eq!(data.vlan, 10);
        assert_eq!(data.intf, 5);
        assert_eq!(data.reason, 1);

        let e = data.entry();
        assert!(!e.is_static);
        assert!(!e.is_control);
        assert_eq!(e.pkt_cmd, aal::PktCmd::Forward);

        assert!(matches!(
            LearnData::decode(5, 1, 10, &frame(src)[..13]),
            Err(FdbError::Malformed(_))
        ));
        assert!(matches!(
            LearnData::decode(5, 1, 70000, &frame(src)),
            Err(FdbError::Malformed(_))
        ));
    }

    #[test]
    fn test_producers() {
        let log = logger();
        let (tx, mut rx) = mpsc::channel(2);

        let src = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
        on_learn(&log, &tx, 5, 1, 10, &frame(src)).unwrap();
        assert!(on_learn(&log, &tx, 5, 1, 10, &[0u8; 10]).is_err());
        on_age(&log, &tx, 7);

        // The queue is full, so this is dropped rather than blocking
        assert!(matches!(
            on_learn(&log, &tx, 5, 1, 10, &frame(src)),
            Err(FdbError::Busy(_))
        ));
        on_age(&log, &tx, 8);

        assert!(matches!(rx.try_recv(), Ok(Event::Learn(d)) if d.intf == 5));
        assert_eq!(rx.try_recv().unwrap(), Event::Age(7));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            post_retry(&log, &tx, Event::PortDown(1)),
            Err(FdbError::Other(_))
        ));
    }

    #[test]
    fn test_post_retry_waits() {
        let log = logger();
        let (tx, mut rx) = mpsc::channel(1);
        post(&log, &tx, Event::PortDown(1)).unwrap();

        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(ev) = rx.blocking_recv() {
                seen.push(ev);
                if seen.len() == 2 {
                    break;
                }
            }
            seen
        });
        post_retry(&log, &tx, Event::VlanRemoved(10)).unwrap();
        assert_eq!(
            consumer.join().unwrap(),
            vec![Event::PortDown(1), Event::VlanRemoved(10)]
        );
    }

    #[test]
    fn test_handler_status() {
        let log = logger();
        let (tx, _rx) = mpsc::channel(4);
        let handler = learn_handler(&log, tx);
        assert!(matches!(
            handler(1, 1, 1, &[0u8; 4]),
            Err(AsicError::InvalidArg(_))
        ));
        assert!(handler(1, 1, 1, &[0u8; 64]).is_ok());
    }
}
