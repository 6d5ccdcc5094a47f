use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::num::NonZeroUsize;
use std::sync::Arc;

use fastcgi_responder::cgi::{self, Request};
use fastcgi_responder::conn::{Handler, ResponseWriter};
use fastcgi_responder::server::Runner;
use fastcgi_responder::Config;


const HELLO_CGI: &str = "hello-cgi-example";

/// Routes requests by method and path. Our example is stateless, but state
/// could be kept in the struct and shared between connection threads.
struct Hello;

impl Handler for Hello {
    fn handle(&self, request: Request, response: &mut ResponseWriter<'_>) {
        use http::Method;
        let path = request.get_var(cgi::Var::SCRIPT_NAME.name()).unwrap_or_default().to_owned();
        let res = match (request.http_method(), path.as_str()) {
            (Some(Method::GET), "/redirect") => handle_redirect(&request, response),
            (Some(Method::POST), "/echo") => handle_echo(request, response),
            (Some(Method::GET | Method::POST), _) => handle_env(&request, response),
            _ => fallback(&request, response),
        };

        // Write errors mean the web server is gone, so there is nobody to tell
        if let Err(e) = res {
            let error: &dyn std::error::Error = &e;
            tracing::error!(error, request_id = response.request_id(), "failed to write response");
        }
    }
}

/// Prints the CGI environment for arbitrary GET and POST requests.
fn handle_env(request: &Request, response: &mut ResponseWriter<'_>) -> io::Result<()> {
    response.set_header(http::header::CONTENT_TYPE.as_str(), "text/plain");
    response.set_header("x-powered-by", HELLO_CGI);
    response.set_header(http::header::VARY.as_str(), "*");
    response.start_response(200)?;

    // Each write becomes its own record, so compose the body first
    let mut body = format!("Hello CGI!\n\nURL: {}\n\n", request.raw_url());
    let mut env: Vec<_> = request.env().iter().collect();
    env.sort_unstable();
    for (name, val) in env {
        body.push_str(name);
        body.push('=');
        body.push_str(val);
        body.push('\n');
    }
    response.write_all(body.as_bytes())
}

/// Performs a client-side redirect with a short body.
fn handle_redirect(request: &Request, response: &mut ResponseWriter<'_>) -> io::Result<()> {
    let target = match request.get_var(cgi::Var::QUERY_STRING.name()) {
        Some("type=local") => "/local?from=redirect",
        _ => "https://example.com/#content",
    };
    response.set_header(http::header::LOCATION.as_str(), target);
    response.set_header(http::header::CONTENT_TYPE.as_str(), "text/plain; charset=utf-8");
    response.start_response(302)?;
    writeln!(response, "Content moved to <{target}>. Redirecting...")
}

/// Echoes the POSTed data back to the client.
fn handle_echo(mut request: Request, response: &mut ResponseWriter<'_>) -> io::Result<()> {
    let content_type = request.headers().get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();
    response.set_header(http::header::CONTENT_TYPE.as_str(), content_type);
    response.set_header(http::header::CACHE_CONTROL.as_str(), "no-store");
    response.start_response(200)?;

    let mut body = Vec::new();
    request.read_to_end(&mut body)?;

    // CONTENT_LENGTH *should* match the stream length. If it doesn't,
    // something is wrong either with the webserver or this library.
    let content_len: usize = request.get_var(cgi::Var::CONTENT_LENGTH.name())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if body.len() != content_len {
        tracing::warn!(read = body.len(), expected = content_len, "echo input stream ended short");
    }
    response.write_all(&body)
}

/// Generates an error response for requests without a route.
fn fallback(request: &Request, response: &mut ResponseWriter<'_>) -> io::Result<()> {
    let (status, body) = match request.method() {
        "PUT" | "DELETE" => (404, "Unknown URL route\n"),
        _ => (501, "HTTP method not implemented\n"),
    };
    response.set_header(http::header::CONTENT_TYPE.as_str(), "text/plain; charset=utf-8");
    response.start_response(status)?;
    response.write_all(body.as_bytes())
}


fn main() {
    init_tracing();
    // Allow up to 10 concurrent connections
    let config = Config::with_conns(NonZeroUsize::new(10).unwrap());
    let runner = Arc::new(Runner::new(config, Hello));

    // Type a line (or close stdin) to shut the server down
    let serving = Arc::clone(&runner);
    let serve_thread = std::thread::spawn(move || server(&serving));
    let mut line = String::new();
    if let Err(e) = io::stdin().read_line(&mut line) {
        let error: &dyn std::error::Error = &e;
        tracing::warn!(error, "reading stdin failed");
    }

    // Gracefully shut down active connections before exiting
    runner.shutdown();
    match serve_thread.join() {
        Ok(Ok(())) => {},
        Ok(Err(e)) => {
            let error: &dyn std::error::Error = &e;
            tracing::error!(error, "server loop failed");
        },
        Err(_) => tracing::error!("server thread panicked"),
    }
}

/// Runs the FastCGI server on localhost:9000.
fn server(runner: &Runner<Hello>) -> io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 9000))?;
    runner.serve(&listener)
}


/// Sets up a basic `tracing` subscriber to stderr. Its verbosity level is
/// configured with the `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{filter::LevelFilter, fmt};
    let max_level = match std::env::var("RUST_LOG") {
        Ok(var) if !var.is_empty() => match var.parse::<LevelFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Ignoring `RUST_LOG={var}`: {e}");
                LevelFilter::INFO
            },
        },
        Ok(_) | Err(std::env::VarError::NotPresent) => LevelFilter::INFO,
        Err(e) => {
            eprintln!("Ignoring `RUST_LOG`: {e}");
            LevelFilter::INFO
        },
    };

    fmt::fmt()
        .with_timer(fmt::time::uptime())
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();
}
