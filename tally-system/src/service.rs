use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, but it can also be implemented on
/// a single message. For each individual message, this type needs to implement the
/// [`FromMessage`] trait.
///
/// # Implementating Interfaces
///
/// There are three main ways to implement interfaces, which depends on the number of messages and
/// their return values. The simplest way is an interface consisting of a **single message** with
/// **no return value**. For this case, use the message directly as interface and choose
/// `NoResponse` as response:
///
/// ```
/// use tally_system::{FromMessage, Interface, NoResponse};
///
/// #[derive(Debug)]
/// pub struct SetFlag(pub bool);
///
/// impl Interface for SetFlag {}
///
/// impl FromMessage<Self> for SetFlag {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
/// ```
///
/// If there is a **single message with a return value**, implement the interface as a wrapper for
/// the message and the return [`Sender`]:
///
/// ```
/// use tally_system::{AsyncResponse, FromMessage, Interface, Sender};
///
/// #[derive(Debug)]
/// pub struct GetFlag;
///
/// pub struct GetFlagWithSender(GetFlag, Sender<bool>);
///
/// impl Interface for GetFlagWithSender {}
///
/// impl FromMessage<GetFlag> for GetFlagWithSender {
///     type Response = AsyncResponse<bool>;
///
///     fn from_message(message: GetFlag, sender: Sender<bool>) -> Self {
///         Self(message, sender)
///     }
/// }
/// ```
///
/// Finally, interfaces can contain **multiple messages**. For this, create an enumeration with a
/// variant for each message, each carrying their sender where a response is expected.
pub trait Interface: Send + 'static {}

/// Services without messages can use `()` as their interface.
impl Interface for () {}

/// Declares a message as part of an [`Interface`].
///
/// Messages have an associated `Response` type that determines the return value of sending the
/// message. Within an interface, the responder can vary for each message. There are two provided
/// responders:
///
/// - [`NoResponse`] for messages that do not have a return value.
/// - [`AsyncResponse`] for messages with a return value that is computed asynchronously.
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value when sending this message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// Response behavior of an [`Interface`] message.
///
/// It defines how a service handles and responds to interface messages, such as through
/// asynchronous responses or fire-and-forget without responding.
pub trait MessageResponse {
    /// Sends responses from the service back to the waiting recipient.
    type Sender;

    /// The type returned from [`Addr::send`].
    type Output;

    /// Returns the response channel for an interface message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// The request when sending an asynchronous message to a service.
///
/// This is returned from [`Addr::send`] when the message responds asynchronously through
/// [`AsyncResponse`]. It is a future that should be awaited. The message still runs to
/// completion if this future is dropped.
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.map_err(|_| SendError))
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
///
/// The sender is part of an [`AsyncResponse`] and should be moved into the service interface
/// type. If this sender is dropped without calling [`send`](Self::send), the request fails with
/// [`SendError`].
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("open", &!self.0.is_closed())
            .finish()
    }
}

impl<T> Sender<T> {
    /// Sends the response value and closes the [`Request`].
    ///
    /// This silently drops the value if the request has been dropped.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// Message response resulting in an asynchronous [`Request`].
///
/// The sender must be placed on the interface in [`FromMessage::from_message`].
pub struct AsyncResponse<T>(PhantomData<T>);

impl<T> fmt::Debug for AsyncResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncResponse")
    }
}

impl<T: Send> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// Message response for fire-and-forget messages with no output.
///
/// There is no sender associated to this response. When implementing [`FromMessage`], the sender
/// can be ignored.
#[derive(Debug)]
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// The receiving end of a service's inbox.
pub type Receiver<I> = mpsc::UnboundedReceiver<I>;

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service that implements a corresponding
/// [`Interface`] as long as the service is running.
///
/// Addresses can be freely cloned. When the last clone is dropped, the message channel of the
/// service closes permanently, which signals to the service that it can shut down.
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response.
    ///
    /// Depending on the message's response behavior, this either returns a future resolving to
    /// the return value, or does not return anything for fire-and-forget messages. The
    /// communication channel with the service is unbounded, so backlogs could occur when sending
    /// too many messages.
    ///
    /// Sending asynchronous messages can fail with `Err(SendError)` if the service has shut down.
    /// The result of asynchronous messages does not have to be awaited. The message will be
    /// delivered and handled regardless.
    pub fn send<M>(&self, message: M) -> <I::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = I::Response::channel();
        // A failed send drops the response sender, which resolves the request with an error.
        self.tx.send(I::from_message(message, tx)).ok();
        rx
    }

    /// Returns a handle that can receive a given message independent of the interface.
    ///
    /// See [`Recipient`] for more information and examples.
    pub fn recipient<M>(self) -> Recipient<M, I::Response>
    where
        I: FromMessage<M>,
    {
        Recipient {
            inner: Box::new(self),
        }
    }

    /// Returns `true` if the service is no longer running.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Creates an address with a custom inbox.
    ///
    /// This is used to start services and to test interactions with a service from the receiving
    /// side without spawning it.
    pub fn custom() -> (Self, Receiver<I>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Addr { tx }, rx)
    }
}

// Manually implement clone since we do not require `I: Clone`.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr")
            .field("open", &!self.tx.is_closed())
            .finish()
    }
}

trait SendDispatch<M>: Send + Sync {
    type Response: MessageResponse;

    fn send(&self, message: M) -> <Self::Response as MessageResponse>::Output;

    fn to_trait_object(&self) -> Box<dyn SendDispatch<M, Response = Self::Response>>;
}

impl<I, M> SendDispatch<M> for Addr<I>
where
    I: Interface + FromMessage<M>,
{
    type Response = <I as FromMessage<M>>::Response;

    fn send(&self, message: M) -> <Self::Response as MessageResponse>::Output {
        Addr::send(self, message)
    }

    fn to_trait_object(&self) -> Box<dyn SendDispatch<M, Response = Self::Response>> {
        Box::new(self.clone())
    }
}

/// An address to a [`Service`] implementing any interface that takes a given message.
///
/// This is similar to an [`Addr`], but it is bound to a single message rather than an interface.
/// It is created with [`Addr::recipient`] and decouples the sender of a message from the exact
/// service handling it.
///
/// ```
/// use tally_system::{Addr, FromMessage, Interface, NoResponse, Recipient};
///
/// #[derive(Debug)]
/// struct Ping;
///
/// impl Interface for Ping {}
///
/// impl FromMessage<Self> for Ping {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
///
/// let (addr, mut rx) = Addr::<Ping>::custom();
/// let recipient: Recipient<Ping, NoResponse> = addr.recipient();
/// recipient.send(Ping);
/// assert!(rx.try_recv().is_ok());
/// ```
pub struct Recipient<M, R> {
    inner: Box<dyn SendDispatch<M, Response = R>>,
}

impl<M, R: MessageResponse> Recipient<M, R> {
    /// Sends a message to the service and returns the response.
    ///
    /// See [`Addr::send`] for more information on the behavior of this method.
    pub fn send(&self, message: M) -> R::Output {
        self.inner.send(message)
    }
}

impl<M, R: MessageResponse> Clone for Recipient<M, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.to_trait_object(),
        }
    }
}

impl<M, R> fmt::Debug for Recipient<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipient<{}>", std::any::type_name::<M>())
    }
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to some [`Interface`] through an [`Addr`] and handle them
/// one by one. Internally, services are free to concurrently process these messages or not.
///
/// The service handler is spawned on the current tokio runtime with [`start`](Self::start), or
/// through a [`ServiceRunner`], which keeps track of the handler to detect panics.
///
/// # Implementing Services
///
/// The standard way to implement services is through the `spawn_handler` function. It receives an
/// inbound channel for all messages sent through the service's address. Note that this function
/// must spawn a tokio task and return its handle rather than blocking.
///
/// ```
/// use tally_system::{FromMessage, Interface, NoResponse, Receiver, Service};
///
/// struct MyMessage;
///
/// impl Interface for MyMessage {}
///
/// impl FromMessage<Self> for MyMessage {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
///
/// struct MyService;
///
/// impl Service for MyService {
///     type Interface = MyMessage;
///
///     fn spawn_handler(self, mut rx: Receiver<Self::Interface>) -> tokio::task::JoinHandle<()> {
///         tokio::spawn(async move {
///             while let Some(message) = rx.recv().await {
///                 // handle the message
///             }
///         })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let addr = MyService.start();
/// # }
/// ```
pub trait Service: Sized {
    /// The interface of messages this service implements.
    ///
    /// The interface can be a single message type or an enumeration of all the messages that
    /// can be handled by this service.
    type Interface: Interface;

    /// Spawns a task to handle service messages.
    ///
    /// Receives an inbound channel for all messages sent through the service's [`Addr`].
    fn spawn_handler(self, rx: Receiver<Self::Interface>) -> JoinHandle<()>;

    /// Starts the service in the current runtime and returns an address for it.
    ///
    /// The handler is detached. Use a [`ServiceRunner`] to observe how the service terminates.
    fn start(self) -> Addr<Self::Interface> {
        let (addr, rx) = Addr::custom();
        self.spawn_handler(rx);
        addr
    }

    /// Returns a unique name for this service implementation.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A service terminated by panicking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePanic {
    /// The [name](Service::name) of the service that panicked.
    pub service: &'static str,
}

impl fmt::Display for ServicePanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {} panicked", self.service)
    }
}

impl std::error::Error for ServicePanic {}

type ServiceJoin = BoxFuture<'static, (&'static str, Result<(), JoinError>)>;

/// Starts services and keeps track of their handlers.
///
/// [`join`](Self::join) waits for all services to terminate and reports the first service that
/// panicked.
#[derive(Default)]
pub struct ServiceRunner(FuturesUnordered<ServiceJoin>);

impl ServiceRunner {
    /// Creates an empty service runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service and tracks its handler.
    pub fn start<S: Service>(&mut self, service: S) -> Addr<S::Interface> {
        let (addr, rx) = Addr::custom();
        self.start_with(service, rx);
        addr
    }

    /// Starts a service with an inbox created upfront through [`Addr::custom`].
    ///
    /// This allows services with cyclic dependencies to know each others' addresses before
    /// they are started.
    pub fn start_with<S: Service>(&mut self, service: S, rx: Receiver<S::Interface>) {
        let name = S::name();
        let handle = service.spawn_handler(rx);
        self.0.push(handle.map(move |result| (name, result)).boxed());
    }

    /// Returns the number of tracked services that have not terminated yet.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no services are being tracked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Waits until all services have terminated.
    ///
    /// Returns early with an error as soon as any service panics. Services cancelled by a runtime
    /// shutdown count as terminated.
    pub async fn join(&mut self) -> Result<(), ServicePanic> {
        while let Some((service, result)) = self.0.next().await {
            match result {
                Ok(()) => tally_log::debug!("service {service} stopped"),
                Err(error) if error.is_panic() => {
                    tally_log::error!("service {service} panicked");
                    return Err(ServicePanic { service });
                }
                Err(_) => tally_log::debug!("service {service} cancelled"),
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ServiceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRunner")
            .field("services", &self.0.len())
            .finish()
    }
}
