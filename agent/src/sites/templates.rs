//! nginx server block templates
//!
//! Rendering is literal `{{ name }}` substitution. Anything conditional (the
//! FastCGI environment lines) is rendered beforehand into a single variable.

use std::collections::BTreeMap;

use tracing::warn;

use crate::models::site::SiteType;

const STATIC_TEMPLATE: &str = r#"# Managed by siteagent: {{ domain }} (static, ssl: {{ ssl_enabled }})
server {
    listen 80;
    listen [::]:80;

    server_name {{ domain }} www.{{ domain }};
    root {{ root_path }};
    index index.html index.htm;

    access_log {{ log_dir }}/{{ site_id }}-access.log;
    error_log {{ log_dir }}/{{ site_id }}-error.log;

    location / {
        try_files $uri $uri/ =404;
    }
}
"#;

const PHP_TEMPLATE: &str = r#"# Managed by siteagent: {{ domain }} (php {{ php_version }}, ssl: {{ ssl_enabled }})
server {
    listen 80;
    listen [::]:80;

    server_name {{ domain }} www.{{ domain }};
    root {{ root_path }};
    index index.php index.html;

    access_log {{ log_dir }}/{{ site_id }}-access.log;
    error_log {{ log_dir }}/{{ site_id }}-error.log;

    location / {
        try_files $uri $uri/ /index.php?$query_string;
    }

    location ~ \.php$ {
        fastcgi_pass unix:{{ php_socket }};
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        include fastcgi_params;
{{ fastcgi_env }}
    }

    location ~ /\.ht {
        deny all;
    }
}
"#;

const LARAVEL_TEMPLATE: &str = r#"# Managed by siteagent: {{ domain }} (laravel, php {{ php_version }}, ssl: {{ ssl_enabled }})
server {
    listen 80;
    listen [::]:80;

    server_name {{ domain }} www.{{ domain }};
    root {{ root_path }};
    index index.php;

    access_log {{ log_dir }}/{{ site_id }}-access.log;
    error_log {{ log_dir }}/{{ site_id }}-error.log;

    charset utf-8;

    location / {
        try_files $uri $uri/ /index.php?$query_string;
    }

    location = /favicon.ico { access_log off; log_not_found off; }
    location = /robots.txt  { access_log off; log_not_found off; }

    error_page 404 /index.php;

    location ~ \.php$ {
        fastcgi_pass unix:{{ php_socket }};
        fastcgi_param SCRIPT_FILENAME $realpath_root$fastcgi_script_name;
        include fastcgi_params;
        fastcgi_hide_header X-Powered-By;
{{ fastcgi_env }}
    }

    location ~ /\.(?!well-known).* {
        deny all;
    }
}
"#;

const PYTHON_TEMPLATE: &str = r#"# Managed by siteagent: {{ domain }} (python, ssl: {{ ssl_enabled }})
upstream {{ site_id }}_backend {
    server 127.0.0.1:{{ upstream_port }};
}

server {
    listen 80;
    listen [::]:80;

    server_name {{ domain }} www.{{ domain }};

    access_log {{ log_dir }}/{{ site_id }}-access.log;
    error_log {{ log_dir }}/{{ site_id }}-error.log;

    location / {
        proxy_pass http://{{ site_id }}_backend;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }
}
"#;

const NODEJS_TEMPLATE: &str = r#"# Managed by siteagent: {{ domain }} (nodejs, ssl: {{ ssl_enabled }})
upstream {{ site_id }}_backend {
    server 127.0.0.1:{{ upstream_port }};
}

server {
    listen 80;
    listen [::]:80;

    server_name {{ domain }} www.{{ domain }};

    access_log {{ log_dir }}/{{ site_id }}-access.log;
    error_log {{ log_dir }}/{{ site_id }}-error.log;

    location / {
        proxy_pass http://{{ site_id }}_backend;
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection 'upgrade';
        proxy_set_header Host $host;
        proxy_cache_bypass $http_upgrade;
    }
}
"#;

pub fn template_for(site_type: SiteType) -> &'static str {
    match site_type {
        SiteType::Static => STATIC_TEMPLATE,
        SiteType::Php => PHP_TEMPLATE,
        SiteType::Laravel => LARAVEL_TEMPLATE,
        SiteType::Python => PYTHON_TEMPLATE,
        SiteType::Nodejs => NODEJS_TEMPLATE,
    }
}

/// Replace every `{{ name }}` with its value. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{{ {} }}}}", name), value);
    }
    rendered
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `fastcgi_param` lines exposing site metadata to PHP.
///
/// Keys must be environment-variable names. Values holding control
/// characters or `$` (nginx would interpolate it) are skipped.
pub fn fastcgi_env(metadata: &BTreeMap<String, String>) -> String {
    let mut lines = Vec::new();
    for (key, value) in metadata {
        if !is_env_name(key) || value.chars().any(|c| c.is_control() || c == '$') {
            warn!("Not exposing metadata entry {} to PHP", key);
            continue;
        }
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        lines.push(format!("        fastcgi_param {} \"{}\";", key, escaped));
    }
    lines.join("\n")
}
