//! A chain of handlers
//!
//! An `HttpService` offers each request to its handlers in the order they
//! were added. The first one to accept the request answers it; a request
//! nobody accepts gets a 404.

use super::{HandlerResult, HttpHandler, HttpRequest, HttpResponse};
use crate::status::HttpStatus;

use std::error::Error;
use std::rc::Rc;

/// What a link of the chain reports: `Ok(true)` if it took the request
pub type AcceptResult = ::std::result::Result<bool, Box<dyn Error>>;

type ServiceHandler = Rc<dyn Fn(&HttpRequest, &HttpResponse) -> AcceptResult>;

/// Names a handler added to a service, for `remove_handler`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

#[derive(Default)]
pub struct HttpService {
    handlers: Vec<(HandlerId, ServiceHandler)>,
    next_id: u32
}

impl HttpService {
    pub fn new() -> HttpService {
        HttpService::default()
    }

    /// Appends a handler to the chain
    ///
    /// A handler that declines a request must leave the response alone.
    pub fn add_handler<F>(&mut self, handler: F) -> HandlerId
        where F: Fn(&HttpRequest, &HttpResponse) -> AcceptResult + 'static
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Rc::new(handler)));
        id
    }

    /// Takes a handler out of the chain; `false` if it wasn't in it
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|&(other, _)| other != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offers a request to the chain
    pub fn handle_request(&self, request: &HttpRequest, response: &HttpResponse)
                          -> HandlerResult
    {
        for &(id, ref handler) in &self.handlers {
            if handler(request, response)? {
                trace!("handler {:?} took {} {}", id, request.method(), request.path());
                return Ok(());
            }
        }

        debug!("no handler for {} {}", request.method(), request.path());
        if response.is_completed() || response.is_aborted() {
            warn!("a handler answered {} {} and then declined it",
                  request.method(), request.path());
        }
        else if response.is_committed() {
            // somebody wrote and then declined; finish what's there
            response.completed()?;
        }
        else {
            response.send_error(HttpStatus::NOT_FOUND, None)?;
        }
        Ok(())
    }

    /// The chain as a channel handler; later changes to `self` don't show
    pub fn to_handler(&self) -> HttpHandler {
        let service = HttpService {
            handlers: self.handlers.clone(),
            next_id: self.next_id
        };
        Rc::new(move |request: &HttpRequest, response: HttpResponse| {
            service.handle_request(request, &response)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::ChannelState;
    use crate::mock::MockTransport;
    use crate::version::HttpVersion;

    use std::cell::RefCell;

    fn answer(path: &'static str, body: &'static str)
              -> impl Fn(&HttpRequest, &HttpResponse) -> AcceptResult
    {
        move |request, response| {
            if request.path() != path {
                return Ok(false);
            }
            response.write(body)?;
            response.completed()?;
            Ok(true)
        }
    }

    #[test]
    fn first_accepting_handler_wins() {
        let mut service = HttpService::new();
        service.add_handler(answer("/a", "first"));
        service.add_handler(answer("/a", "second"));
        service.add_handler(answer("/b", "bee"));

        let transport = MockTransport::new();
        transport.run(service.to_handler(), HttpVersion::Version1_0, "GET", "/a", &[], "");
        assert_eq!(transport.response_body(), b"first");

        transport.run(service.to_handler(), HttpVersion::Version1_0, "GET", "/b", &[], "");
        assert_eq!(transport.response_body(), b"bee");
    }

    #[test]
    fn unclaimed_request_is_not_found() {
        let mut service = HttpService::new();
        service.add_handler(answer("/a", "first"));

        let transport = MockTransport::new();
        let channel = transport.run(service.to_handler(), HttpVersion::Version1_1, "GET",
                                    "/elsewhere", &[("Host", "h")], "");
        assert_eq!(transport.response_info().status, HttpStatus::NOT_FOUND);
        assert_eq!(channel.state(), ChannelState::Completed);
    }

    #[test]
    fn empty_service_is_not_found() {
        let transport = MockTransport::new();
        transport.run(HttpService::new().to_handler(), HttpVersion::Version1_0,
                      "GET", "/", &[], "");
        assert_eq!(transport.response_info().status, HttpStatus::NOT_FOUND);
    }

    #[test]
    fn removed_handler_is_skipped() {
        let mut service = HttpService::new();
        let first = service.add_handler(answer("/a", "first"));
        service.add_handler(answer("/a", "second"));

        assert!(service.remove_handler(first));
        assert!(!service.remove_handler(first));
        assert_eq!(service.len(), 1);

        let transport = MockTransport::new();
        transport.run(service.to_handler(), HttpVersion::Version1_0, "GET", "/a", &[], "");
        assert_eq!(transport.response_body(), b"second");
    }

    #[test]
    fn handlers_are_asked_in_order() {
        let asked = Rc::new(RefCell::new(Vec::new()));
        let mut service = HttpService::new();
        for name in &["one", "two", "three"] {
            let asked = asked.clone();
            let name = *name;
            service.add_handler(move |_, response| {
                asked.borrow_mut().push(name);
                if name != "two" {
                    return Ok(false);
                }
                response.completed()?;
                Ok(true)
            });
        }

        let transport = MockTransport::new();
        transport.run(service.to_handler(), HttpVersion::Version1_0, "GET", "/", &[], "");
        assert_eq!(*asked.borrow(), vec!["one", "two"]);
        assert_eq!(transport.response_info().status, HttpStatus::OK);
    }

    #[test]
    fn handler_error_stops_the_chain() {
        let mut service = HttpService::new();
        service.add_handler(|_, _| Err(From::from("broken")));
        service.add_handler(answer("/", "unreached"));

        let transport = MockTransport::new();
        transport.run(service.to_handler(), HttpVersion::Version1_0, "GET", "/", &[], "");
        assert_eq!(transport.response_info().status, HttpStatus::INTERNAL_SERVER_ERROR);
        assert!(transport.response_body() != b"unreached");
    }
}
