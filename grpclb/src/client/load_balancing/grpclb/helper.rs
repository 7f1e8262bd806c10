/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

use std::sync::Arc;

use tracing::debug;

use super::client_stats::ClientStats;
use super::picker::{DropSchedule, GrpclbPicker};
use crate::client::balancer::BalancerChannel;
use crate::client::channel_args::ChannelArgs;
use crate::client::load_balancing::{ChannelController, LbState, Subchannel};
use crate::client::name_resolution::ServerAddress;

/// The channel controller handed to a child policy.
///
/// Picker updates and created subchannels are captured so the policy can
/// decide where they belong, and re-resolution requests are dropped while
/// the balancer is providing the addresses.
pub(super) struct GrpclbHelper<'a> {
    channel_controller: &'a mut dyn ChannelController,
    seen_serverlist: bool,
    pub(super) created_subchannels: Vec<Arc<dyn Subchannel>>,
    pub(super) picker_update: Option<LbState>,
}

impl<'a> GrpclbHelper<'a> {
    pub(super) fn new(
        channel_controller: &'a mut dyn ChannelController,
        seen_serverlist: bool,
    ) -> Self {
        Self {
            channel_controller,
            seen_serverlist,
            created_subchannels: vec![],
            picker_update: None,
        }
    }
}

pub(super) fn wrap_child_state(
    state: LbState,
    client_stats: Option<Arc<ClientStats>>,
    drops: Option<Arc<DropSchedule>>,
) -> LbState {
    LbState {
        connectivity_state: state.connectivity_state,
        picker: Arc::new(GrpclbPicker::new(state.picker, client_stats, drops)),
    }
}

impl ChannelController for GrpclbHelper<'_> {
    fn new_subchannel(&mut self, address: &ServerAddress) -> Arc<dyn Subchannel> {
        let subchannel = self.channel_controller.new_subchannel(address);
        self.created_subchannels.push(subchannel.clone());
        subchannel
    }

    fn update_picker(&mut self, update: LbState) {
        self.picker_update = Some(update);
    }

    fn request_resolution(&mut self) {
        if self.seen_serverlist {
            debug!("ignoring re-resolution request while the balancer provides addresses");
            return;
        }
        self.channel_controller.request_resolution();
    }

    fn create_balancer_channel(
        &mut self,
        target: &str,
        args: &ChannelArgs,
    ) -> Arc<dyn BalancerChannel> {
        self.channel_controller.create_balancer_channel(target, args)
    }
}
