// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use dbus::channel::MatchingReceiver;
use dbus::message::MatchRule;
use dbus_crossroads::Crossroads;
use dbus_crossroads::IfaceBuilder;
use dbus_crossroads::IfaceToken;
use dbus_crossroads::MethodErr;
use dbus_tokio::connection;
use log::error;
use log::info;

use crate::lowmem::profile::ScreenState;
use crate::lowmem::swap_request::SwapRequest;
use crate::lowmem::LowMemoryKiller;
use crate::pressure::pressure_loop;
use crate::reclaim::ReclaimAuthority;
use crate::reclaim::Shrinker;
use crate::reclaim::Urgency;
use crate::sync::NoPoison;

const SERVICE_NAME: &str = "org.chromium.LowMemoryKiller";
const PATH_NAME: &str = "/org/chromium/LowMemoryKiller";
const INTERFACE_NAME: &str = SERVICE_NAME;

// Context data for the D-Bus service.
#[derive(Clone)]
struct DbusContext {
    lmk: Arc<Mutex<LowMemoryKiller>>,
}

fn to_cutoff_scores(raw: Vec<i32>) -> Result<Vec<i16>, MethodErr> {
    raw.into_iter()
        .map(|score| {
            i16::try_from(score).map_err(|_| MethodErr::failed("Cutoff score out of range"))
        })
        .collect()
}

fn register_interface(cr: &mut Crossroads) -> IfaceToken<DbusContext> {
    cr.register(INTERFACE_NAME, |b: &mut IfaceBuilder<DbusContext>| {
        b.method(
            "GetCutoffScores",
            (),
            ("scores",),
            move |_, context, ()| {
                let lmk = context.lmk.do_lock();
                Ok((lmk
                    .cutoff_scores()
                    .iter()
                    .map(|&s| i32::from(s))
                    .collect::<Vec<i32>>(),))
            },
        );
        b.method(
            "SetCutoffScores",
            ("scores",),
            (),
            move |_, context, (raw,): (Vec<i32>,)| {
                let scores = to_cutoff_scores(raw)?;
                context
                    .lmk
                    .do_lock()
                    .set_cutoff_scores(scores)
                    .map_err(|e| {
                        error!("SetCutoffScores failed: {:#}", e);
                        MethodErr::failed("Failed to set cutoff scores")
                    })
            },
        );
        b.method("GetMinfree", (), ("minfree",), move |_, context, ()| {
            Ok((context.lmk.do_lock().min_free_pages().to_vec(),))
        });
        b.method(
            "SetMinfree",
            ("minfree",),
            (),
            move |_, context, (minfree,): (Vec<u32>,)| {
                context
                    .lmk
                    .do_lock()
                    .set_min_free_pages(minfree)
                    .map_err(|e| {
                        error!("SetMinfree failed: {:#}", e);
                        MethodErr::failed("Failed to set minfree")
                    })
            },
        );
        b.method(
            "GetMinfreeScreenOff",
            (),
            ("minfree",),
            move |_, context, ()| {
                Ok((context.lmk.do_lock().min_free_pages_screen_off().to_vec(),))
            },
        );
        b.method(
            "SetMinfreeScreenOff",
            ("minfree",),
            (),
            move |_, context, (minfree,): (Vec<u32>,)| {
                context
                    .lmk
                    .do_lock()
                    .set_min_free_pages_screen_off(minfree)
                    .map_err(|e| {
                        error!("SetMinfreeScreenOff failed: {:#}", e);
                        MethodErr::failed("Failed to set screen off minfree")
                    })
            },
        );
        b.method(
            "SetPoolCapacity",
            ("capacity",),
            (),
            move |_, context, (capacity,): (u32,)| {
                context
                    .lmk
                    .do_lock()
                    .set_pool_capacity(capacity as usize)
                    .map_err(|_| MethodErr::failed("Unsupported pool capacity"))
            },
        );
        b.method(
            "SetCooldownMs",
            ("cooldown_ms",),
            (),
            move |_, context, (cooldown_ms,): (u32,)| {
                context
                    .lmk
                    .do_lock()
                    .set_cooldown(Duration::from_millis(u64::from(cooldown_ms)));
                Ok(())
            },
        );
        b.method("GetCost", (), ("cost",), move |_, context, ()| {
            Ok((context.lmk.do_lock().cost(),))
        });
        b.method(
            "SetCost",
            ("cost",),
            (),
            move |_, context, (cost,): (u32,)| {
                context.lmk.do_lock().set_cost(cost);
                Ok(())
            },
        );
        b.method(
            "SetDebugLevel",
            ("level",),
            (),
            move |_, context, (level,): (u32,)| {
                context
                    .lmk
                    .do_lock()
                    .set_debug_level(level)
                    .map_err(|_| MethodErr::failed("Unsupported debug level value"))
            },
        );
        b.method(
            "SetScreenInteractive",
            ("interactive",),
            (),
            move |_, context, (interactive,): (bool,)| {
                let state = if interactive {
                    ScreenState::Interactive
                } else {
                    ScreenState::NonInteractive
                };
                context.lmk.do_lock().set_screen_state(state);
                Ok(())
            },
        );
        b.method(
            "GetReclaimableEstimate",
            (),
            ("pages",),
            move |_, context, ()| {
                Ok((context.lmk.do_lock().evaluate(0, Urgency::Periodic),))
            },
        );
        b.method(
            "GetSwapRequest",
            (),
            ("pid", "proceed"),
            move |_, context, ()| {
                let request = context.lmk.do_lock().swap_request();
                Ok((request.target_pid, request.proceed))
            },
        );
        b.method(
            "SetSwapRequest",
            ("pid", "proceed"),
            (),
            move |_, context, (target_pid, proceed): (i32, bool)| {
                context.lmk.do_lock().set_swap_request(SwapRequest {
                    target_pid,
                    proceed,
                });
                Ok(())
            },
        );
    })
}

/// Exports the low memory killer on the system bus, then runs the pressure
/// loop.
pub async fn service_main(
    root: &Path,
    lmk: Arc<Mutex<LowMemoryKiller>>,
    authority: ReclaimAuthority,
) -> Result<()> {
    let context = DbusContext { lmk };

    let (io_resource, conn) = connection::new_system_sync()?;

    // io_resource must be awaited to start receiving D-Bus message.
    let _handle = tokio::spawn(async {
        let err = io_resource.await;
        panic!("Lost connection to D-Bus: {}", err);
    });

    conn.request_name(SERVICE_NAME, false, true, false).await?;

    let mut cr = Crossroads::new();

    // Enable asynchronous methods. Incoming method calls are spawned as separate tasks if
    // necessary.
    cr.set_async_support(Some((
        conn.clone(),
        Box::new(|x| {
            tokio::spawn(x);
        }),
    )));

    let token = register_interface(&mut cr);
    cr.insert(PATH_NAME, &[token], context);

    conn.start_receive(
        MatchRule::new_method_call(),
        Box::new(move |msg, conn| match cr.handle_message(msg, conn) {
            Ok(()) => true,
            Err(()) => {
                error!("error handling D-Bus message");
                false
            }
        }),
    );

    info!("{} is exported", SERVICE_NAME);

    pressure_loop(root, authority).await;
    Ok(())
}
