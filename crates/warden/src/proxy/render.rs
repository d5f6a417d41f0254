//! Proxy configuration rendering.
//!
//! Pure functions from a profile plus rendering inputs to the nginx
//! configuration text the switcher places. Hosts split into a frontend
//! group (primary domain and its `www` alias, proxied to the frontend
//! tier with `/api/` carved out for the backend) and a backend group
//! (remaining names, proxied straight to the backend API).

use std::path::PathBuf;

use warden_common::DomainSet;

use super::ProxyProfile;

/// Inputs for configuration rendering.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Hostnames the proxy answers for
    pub domains: DomainSet,
    /// Webroot serving `/.well-known/acme-challenge/`
    pub webroot: PathBuf,
    /// Upstream address of the frontend tier
    pub frontend_addr: String,
    /// Upstream address of the backend API tier
    pub backend_addr: String,
    /// Certificate chain path (secure profile)
    pub cert_path: PathBuf,
    /// Private key path (secure profile)
    pub key_path: PathBuf,
}

impl RenderContext {
    /// Primary domain and its `www` alias.
    fn frontend_hosts(&self) -> Vec<&str> {
        self.domains
            .names()
            .iter()
            .map(String::as_str)
            .filter(|name| {
                *name == self.domains.primary()
                    || name.strip_prefix("www.") == Some(self.domains.primary())
            })
            .collect()
    }

    /// Every other name (API subdomains), proxied straight to the backend.
    fn backend_hosts(&self) -> Vec<&str> {
        self.domains
            .names()
            .iter()
            .map(String::as_str)
            .filter(|name| {
                *name != self.domains.primary()
                    && name.strip_prefix("www.") != Some(self.domains.primary())
            })
            .collect()
    }
}

/// Render the configuration file for a profile.
pub fn render(profile: ProxyProfile, ctx: &RenderContext) -> String {
    match profile {
        ProxyProfile::ChallengeOnly => render_challenge(ctx),
        ProxyProfile::Secure => render_secure(ctx),
    }
}

fn render_challenge(ctx: &RenderContext) -> String {
    let mut out = header(ProxyProfile::ChallengeOnly);

    out.push_str(&server_block(&[
        &format!("    listen 80;\n    server_name {};\n", ctx.frontend_hosts().join(" ")),
        &acme_location(ctx),
        &proxy_location("/api/", &ctx.backend_addr),
        &proxy_location("/", &ctx.frontend_addr),
    ]));

    let backend_hosts = ctx.backend_hosts();
    if !backend_hosts.is_empty() {
        out.push('\n');
        out.push_str(&server_block(&[
            &format!("    listen 80;\n    server_name {};\n", backend_hosts.join(" ")),
            &acme_location(ctx),
            &proxy_location("/", &ctx.backend_addr),
        ]));
    }

    out
}

fn render_secure(ctx: &RenderContext) -> String {
    let mut out = header(ProxyProfile::Secure);

    // Port 80: challenge path stays served, everything else redirects
    out.push_str(&server_block(&[
        &format!(
            "    listen 80;\n    server_name {};\n",
            ctx.domains.names().join(" ")
        ),
        &acme_location(ctx),
        "    location / {\n        return 301 https://$host$request_uri;\n    }\n",
    ]));

    out.push('\n');
    out.push_str(&server_block(&[
        &format!(
            "    listen 443 ssl;\n    http2 on;\n    server_name {};\n",
            ctx.frontend_hosts().join(" ")
        ),
        &tls_directives(ctx),
        &proxy_location("/api/", &ctx.backend_addr),
        &proxy_location("/", &ctx.frontend_addr),
    ]));

    let backend_hosts = ctx.backend_hosts();
    if !backend_hosts.is_empty() {
        out.push('\n');
        out.push_str(&server_block(&[
            &format!(
                "    listen 443 ssl;\n    http2 on;\n    server_name {};\n",
                backend_hosts.join(" ")
            ),
            &tls_directives(ctx),
            &proxy_location("/", &ctx.backend_addr),
        ]));
    }

    out
}

fn header(profile: ProxyProfile) -> String {
    format!("# Generated by warden ({profile} profile) - do not edit\n\n")
}

fn server_block(sections: &[&str]) -> String {
    let mut block = String::from("server {\n");
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            block.push('\n');
        }
        block.push_str(section);
    }
    block.push_str("}\n");
    block
}

fn acme_location(ctx: &RenderContext) -> String {
    format!(
        "    location /.well-known/acme-challenge/ {{\n        root {};\n    }}\n",
        ctx.webroot.display()
    )
}

fn proxy_location(path: &str, upstream: &str) -> String {
    format!(
        "    location {path} {{\n\
         \x20       proxy_pass http://{upstream};\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Real-IP $remote_addr;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20       proxy_set_header X-Forwarded-Proto $scheme;\n\
         \x20   }}\n"
    )
}

fn tls_directives(ctx: &RenderContext) -> String {
    format!(
        "    ssl_certificate {};\n\
         \x20   ssl_certificate_key {};\n\
         \x20   ssl_protocols TLSv1.2 TLSv1.3;\n\
         \x20   ssl_prefer_server_ciphers on;\n",
        ctx.cert_path.display(),
        ctx.key_path.display()
    )
}
