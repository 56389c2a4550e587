//! This module describes the messages exchanged over the secure transport.
//!
//! The transport is a QUIC connection, and everything is carried over bidirectional streams. As
//! with any protocol over QUIC streams, the opener of a stream is always the first one to talk,
//! since a stream doesn't exist for the other peer until bytes are actually sent through it.
//! Every stream therefore starts with a single [`StreamKind`] byte, which says what the stream
//! is for.
//!
//! # Global-request streams
//! The client opens exactly one global-request stream per connection. Through it, it sends
//! [`GlobalRequestFrame`]s, each one a request type (e.g. [`TCPIP_FORWARD`]) plus an opaque
//! payload, and the server answers every request with a [`GlobalReplyFrame`] in the same order
//! the requests were sent. Requests may be pipelined. The payloads of the requests this protocol
//! knows about are described in [`forwarding`](self#forwarding).
//!
//! # Channels
//! Either peer may open a channel by opening a stream and sending a [`ChannelOpenFrame`], which
//! holds a channel type (e.g. [`FORWARDED_TCPIP`]) and an opaque payload. The other peer answers
//! with a [`ChannelOpenReply`]. If the channel was rejected, the stream is then closed. Otherwise,
//! the stream carries raw user data in both directions until either side closes it.
//!
//! # Forwarding
//! A [`TCPIP_FORWARD`] request carries a [`TcpipForwardRequest`] and, on success, the reply
//! payload is a [`TcpipForwardResponse`] holding the port the server actually bound. For every
//! connection the server accepts on that port, it opens a [`FORWARDED_TCPIP`] channel whose
//! payload is a [`ForwardedTcpipRequest`]. A [`CANCEL_TCPIP_FORWARD`] request, also carrying a
//! [`TcpipForwardRequest`], asks the server to stop listening on a previously bound port.

mod channel;
mod forwarding;
mod global;
mod stream_kind;

pub use channel::*;
pub use forwarding::*;
pub use global::*;
pub use stream_kind::*;
