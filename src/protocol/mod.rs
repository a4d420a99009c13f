// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The MCP request/response wire format: framing, the JSON-RPC envelope,
//! and the tool dispatcher built on top of both.

pub mod dispatch;
pub mod frame;
pub mod rpc;

pub use dispatch::handle_request;
pub use frame::{read_frame, write_frame, FrameError, FrameOutcome, MAX_FRAME_LEN};
pub use rpc::{error_response, parse_tool_call, success_response, EnvelopeError, Id, ToolCallRequest};
