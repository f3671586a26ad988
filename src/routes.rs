use crate::{
    api::{
        attendance, audit_log, company, dashboard, employee, parameter, pay_cycle, payment,
        payslip, report, user,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{HttpResponse, middleware::from_fn, web};
use serde_json::json;
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(requests_per_min)).max(1);

    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            tracing::warn!(requests_per_min, "Invalid rate limit, falling back to defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "Health"
)]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Malformed bodies, query strings and path segments answer like any other validation error.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::validation(format!("Invalid JSON body: {err}")).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::validation(format!("Invalid query string: {err}")).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| AppError::validation(format!("Invalid path: {err}")).into()),
    );
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    extractor_configs(cfg);

    cfg.route("/health", web::get().to(health));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(web::resource("/me/password").route(web::put().to(handlers::change_password)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard::dashboard)))
            .service(
                web::scope("/companies")
                    .service(
                        web::resource("")
                            .route(web::post().to(company::create_company))
                            .route(web::get().to(company::list_companies)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(company::get_company))
                            .route(web::put().to(company::update_company))
                            .route(web::delete().to(company::delete_company)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::post().to(user::create_user))
                            .route(web::get().to(user::list_users)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(user::get_user))
                            .route(web::put().to(user::update_user))
                            .route(web::delete().to(user::deactivate_user)),
                    ),
            )
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(employee::update_employee))
                            .route(web::get().to(employee::get_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    )
                    // /employees/{id}/status
                    .service(
                        web::resource("/{id}/status")
                            .route(web::put().to(employee::set_employee_status)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(web::resource("/check-out").route(web::post().to(attendance::check_out)))
                    .service(
                        web::resource("/records")
                            .route(web::post().to(attendance::record_attendance)),
                    ),
            )
            .service(
                web::scope("/pay-cycles")
                    .service(
                        web::resource("")
                            .route(web::post().to(pay_cycle::create_pay_cycle))
                            .route(web::get().to(pay_cycle::list_pay_cycles)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(pay_cycle::get_pay_cycle)))
                    .service(
                        web::resource("/{id}/generate")
                            .route(web::post().to(pay_cycle::generate_payslips)),
                    )
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::post().to(pay_cycle::approve_pay_cycle)),
                    )
                    .service(
                        web::resource("/{id}/close").route(web::post().to(pay_cycle::close_pay_cycle)),
                    ),
            )
            .service(
                web::scope("/payslips")
                    .service(web::resource("").route(web::get().to(payslip::list_payslips)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(payslip::get_payslip))
                            .route(web::put().to(payslip::adjust_payslip)),
                    ),
            )
            .service(
                web::scope("/payments")
                    .service(
                        web::resource("")
                            .route(web::post().to(payment::create_payment))
                            .route(web::get().to(payment::list_payments)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(payment::get_payment)))
                    .service(
                        web::resource("/{id}/status")
                            .route(web::put().to(payment::update_payment_status)),
                    ),
            )
            .service(
                web::scope("/reports")
                    .service(
                        web::resource("")
                            .route(web::post().to(report::generate_report))
                            .route(web::get().to(report::list_reports)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(report::get_report))),
            )
            .service(web::resource("/audit-logs").route(web::get().to(audit_log::list_audit_logs)))
            .service(
                web::scope("/parameters")
                    .service(web::resource("").route(web::get().to(parameter::list_parameters)))
                    .service(
                        web::resource("/{key}")
                            .route(web::get().to(parameter::get_parameter))
                            .route(web::put().to(parameter::upsert_parameter))
                            .route(web::delete().to(parameter::delete_parameter)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns new access_token + rotated refresh_token

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::test_config;
    use crate::auth::jwt::{TokenSubject, generate_access_token, generate_refresh_token};
    use crate::model::role::Role;
    use actix_web::{App, body::to_bytes, dev::ServiceResponse, http::StatusCode, test, web::Data};
    use serde_json::Value;
    use sqlx::mysql::MySqlPoolOptions;
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn token_for(role: Role, employee_id: Option<u64>) -> String {
        let subject = TokenSubject {
            user_id: 7,
            email: "tester@example.com".to_string(),
            role: role.id(),
            company_id: if role == Role::SuperAdmin { None } else { Some(1) },
            employee_id,
        };
        generate_access_token(&subject, &test_config().jwt_secret, 900).unwrap()
    }

    /// Real route table over a pool that never connects; every request below
    /// is answered before a query would run.
    macro_rules! app {
        () => {{
            let config = test_config();
            let pool = MySqlPoolOptions::new()
                .connect_lazy(&config.database_url)
                .unwrap();
            let routes_config = config.clone();
            test::init_service(
                App::new()
                    .app_data(Data::new(pool))
                    .app_data(Data::new(config))
                    .configure(move |cfg| configure(cfg, routes_config.clone())),
            )
            .await
        }};
    }

    async fn json_body(resp: ServiceResponse) -> Value {
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[::core::prelude::v1::test]
    fn limiter_builds_for_any_configured_rate() {
        for rate in [0, 1, 60, 1000, 120_000] {
            let _limiter = build_limiter(rate);
        }
    }

    #[actix_web::test]
    async fn health_is_public() {
        let app = app!();
        let req = test::TestRequest::get().uri("/health").peer_addr(peer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn protected_route_without_token_is_401() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/v1/companies")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"], "UNAUTHORIZED");
    }

    #[actix_web::test]
    async fn refresh_token_cannot_call_the_api() {
        let app = app!();
        let subject = TokenSubject {
            user_id: 7,
            email: "tester@example.com".to_string(),
            role: Role::Admin.id(),
            company_id: Some(1),
            employee_id: None,
        };
        let (refresh, _) = generate_refresh_token(&subject, &test_config().jwt_secret, 900).unwrap();

        let req = test::TestRequest::get()
            .uri("/api/v1/me")
            .insert_header(("Authorization", format!("Bearer {refresh}")))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn me_returns_the_principal() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/v1/me")
            .insert_header(("Authorization", format!("Bearer {}", token_for(Role::Employee, Some(5)))))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["role"], "EMPLOYEE");
        assert_eq!(body["employee_id"], 5);
    }

    #[actix_web::test]
    async fn disallowed_roles_get_403_with_fixed_body() {
        let app = app!();
        let cases = [
            (test::TestRequest::get().uri("/api/v1/users"), Role::Cashier),
            (test::TestRequest::delete().uri("/api/v1/companies/1"), Role::Admin),
            (test::TestRequest::get().uri("/api/v1/audit-logs"), Role::Employee),
            (test::TestRequest::post().uri("/api/v1/pay-cycles/1/close"), Role::Cashier),
            (test::TestRequest::post().uri("/api/v1/pay-cycles/1/generate"), Role::Employee),
            (test::TestRequest::get().uri("/api/v1/payments"), Role::Employee),
            (test::TestRequest::get().uri("/api/v1/reports/3"), Role::Cashier),
        ];

        for (builder, role) in cases {
            let req = builder
                .insert_header(("Authorization", format!("Bearer {}", token_for(role, None))))
                .peer_addr(peer())
                .to_request();
            let resp = test::call_service(&app, req).await;

            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "role {role}");
            let body = json_body(resp).await;
            assert_eq!(body["error"], "FORBIDDEN");
            assert_eq!(body["message"], "Access denied");
        }
    }

    #[actix_web::test]
    async fn malformed_json_is_a_validation_error() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/api/v1/companies")
            .insert_header(("Authorization", format!("Bearer {}", token_for(Role::SuperAdmin, None))))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{\"name\": ")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "VALIDATION_ERROR");
    }

    #[actix_web::test]
    async fn non_numeric_id_is_a_validation_error() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/v1/employees/abc")
            .insert_header(("Authorization", format!("Bearer {}", token_for(Role::Admin, None))))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn logout_always_answers_204() {
        let app = app!();
        let req = test::TestRequest::post().uri("/auth/logout").peer_addr(peer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn refresh_without_token_is_401() {
        let app = app!();
        let req = test::TestRequest::post().uri("/auth/refresh").peer_addr(peer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn login_requires_email_and_password() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": " ", "password": "" }))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
